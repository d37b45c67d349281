//! # Topology Locator
//!
//! Purpose: Ask the configured discovery endpoints (Sentinels) for the
//! current master and replica addresses of a replication group.
//!
//! ## Design Principles
//! 1. **Fresh Every Time**: Nothing is cached; each call is a new query so a
//!    dial after failover always sees the latest topology.
//! 2. **Linear Scan**: Endpoints are tried in configured order, first success
//!    wins, one pass per call, no backoff.
//! 3. **Short-Lived Connections**: Each query opens and closes its own
//!    connection; discovery traffic never touches the data pools.

use std::sync::Arc;

use tracing::{debug, warn};

use skv_common::{join_host_port, SkvError, SkvResult, Topology};

use crate::connection::{Connection, TransportConfig};
use crate::resp::RespValue;

/// Replica flags that make a replica unsuitable for reads.
const UNAVAILABLE_FLAGS: [&str; 3] = ["s_down", "o_down", "disconnected"];

/// Resolves group topology through an ordered list of discovery endpoints.
#[derive(Debug, Clone)]
pub struct TopologyLocator {
    endpoints: Vec<String>,
    transport: Arc<TransportConfig>,
}

impl TopologyLocator {
    /// Creates a locator; `transport` should already be the discovery variant
    /// (see `TransportConfig::for_discovery`).
    pub fn new(endpoints: Vec<String>, transport: Arc<TransportConfig>) -> Self {
        TopologyLocator {
            endpoints,
            transport,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the current master address of `group`.
    pub fn resolve_master(&self, group: &str) -> SkvResult<String> {
        self.query(group, |conn| query_master(conn, group))
    }

    /// Returns the currently available replicas of `group`, possibly empty.
    pub fn resolve_replicas(&self, group: &str) -> SkvResult<Vec<String>> {
        self.query(group, |conn| query_replicas(conn, group))
    }

    /// Resolves master and replicas from the same endpoint.
    pub fn resolve(&self, group: &str) -> SkvResult<Topology> {
        self.query(group, |conn| {
            let master = query_master(conn, group)?;
            let replicas = query_replicas(conn, group)?;
            Ok(Topology { master, replicas })
        })
    }

    fn query<T, F>(&self, group: &str, mut f: F) -> SkvResult<T>
    where
        F: FnMut(&mut Connection) -> SkvResult<T>,
    {
        let mut last_err: Option<SkvError> = None;

        for endpoint in &self.endpoints {
            let result = Connection::connect(endpoint, &self.transport).and_then(|mut conn| {
                let answer = f(&mut conn);
                // Best effort: the query result is what matters.
                let _ = conn.shutdown();
                answer
            });

            match result {
                Ok(answer) => {
                    debug!(endpoint = %endpoint, group, "discovery query answered");
                    return Ok(answer);
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, group, error = %err, "discovery endpoint failed");
                    last_err = Some(err);
                }
            }
        }

        let reason = match last_err {
            Some(err) => err.to_string(),
            None => "no discovery endpoints configured".to_string(),
        };
        Err(SkvError::DiscoveryUnavailable {
            group: group.to_string(),
            reason,
        })
    }
}

fn query_master(conn: &mut Connection, group: &str) -> SkvResult<String> {
    let reply = conn
        .exec(&[b"SENTINEL", b"get-master-addr-by-name", group.as_bytes()])?
        .into_result()?;

    match reply {
        RespValue::Array(items) if items.len() == 2 => {
            let host = items[0].as_bytes().ok_or(SkvError::UnexpectedResponse)?;
            let port = items[1].as_bytes().ok_or(SkvError::UnexpectedResponse)?;
            let host = std::str::from_utf8(host).map_err(|_| SkvError::UnexpectedResponse)?;
            let port = std::str::from_utf8(port).map_err(|_| SkvError::UnexpectedResponse)?;
            if host.is_empty() {
                return Err(SkvError::UnexpectedResponse);
            }
            Ok(join_host_port(host, port))
        }
        reply if reply.is_nil() => Err(SkvError::Server {
            message: format!("no master known for group {}", group),
        }),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

fn query_replicas(conn: &mut Connection, group: &str) -> SkvResult<Vec<String>> {
    let reply = conn
        .exec(&[b"SENTINEL", b"slaves", group.as_bytes()])?
        .into_result()?;

    match reply {
        RespValue::Array(entries) => Ok(entries.iter().filter_map(available_replica).collect()),
        RespValue::Nil => Ok(Vec::new()),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

/// Reads one flat field/value replica entry; `None` when it is down or
/// incomplete.
fn available_replica(entry: &RespValue) -> Option<String> {
    let fields = match entry {
        RespValue::Array(fields) => fields,
        _ => return None,
    };

    let mut ip = None;
    let mut port = None;
    let mut flags = "";
    for pair in fields.chunks_exact(2) {
        let key = pair[0].as_bytes()?;
        let value = std::str::from_utf8(pair[1].as_bytes()?).ok()?;
        match key {
            b"ip" => ip = Some(value),
            b"port" => port = Some(value),
            b"flags" => flags = value,
            _ => {}
        }
    }

    if flags
        .split(',')
        .any(|flag| UNAVAILABLE_FLAGS.contains(&flag))
    {
        return None;
    }
    Some(join_host_port(ip?, port?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::Bulk(Some(s.as_bytes().to_vec()))
    }

    fn entry(ip: &str, port: &str, flags: &str) -> RespValue {
        RespValue::Array(vec![
            bulk("name"),
            bulk(&format!("{}:{}", ip, port)),
            bulk("ip"),
            bulk(ip),
            bulk("port"),
            bulk(port),
            bulk("flags"),
            bulk(flags),
        ])
    }

    #[test]
    fn keeps_healthy_replica() {
        assert_eq!(
            available_replica(&entry("10.0.0.2", "6379", "slave")),
            Some("10.0.0.2:6379".to_string())
        );
    }

    #[test]
    fn drops_down_or_disconnected_replicas() {
        assert_eq!(available_replica(&entry("10.0.0.2", "6379", "slave,s_down")), None);
        assert_eq!(available_replica(&entry("10.0.0.3", "6379", "slave,o_down")), None);
        assert_eq!(available_replica(&entry("10.0.0.4", "6379", "slave,disconnected")), None);
    }

    #[test]
    fn incomplete_entry_is_skipped() {
        let partial = RespValue::Array(vec![bulk("ip"), bulk("10.0.0.2")]);
        assert_eq!(available_replica(&partial), None);
    }

    #[test]
    fn no_endpoints_is_discovery_unavailable() {
        let locator = TopologyLocator::new(Vec::new(), Arc::new(TransportConfig::default()));
        match locator.resolve_master("mymaster") {
            Err(SkvError::DiscoveryUnavailable { group, .. }) => assert_eq!(group, "mymaster"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
