//! # Fake Sentinel
//!
//! Answers the discovery queries for one replication group from a topology
//! that tests rewrite at will: promote a new master, add or flag replicas,
//! or forget the master entirely.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::protocol::{resp_bulk_array, resp_error, resp_null_array, resp_simple, resp_array};
use crate::server::{serve, CommandCounter, Handler, ServerHandle, Session};

/// One replica as the Sentinel reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEntry {
    pub addr: String,
    /// Comma-separated Sentinel flags, e.g. `slave` or `slave,s_down`.
    pub flags: String,
}

impl ReplicaEntry {
    pub fn healthy(addr: &str) -> Self {
        ReplicaEntry {
            addr: addr.to_string(),
            flags: "slave".to_string(),
        }
    }

    pub fn flagged(addr: &str, flags: &str) -> Self {
        ReplicaEntry {
            addr: addr.to_string(),
            flags: flags.to_string(),
        }
    }
}

struct SentinelState {
    group: String,
    master: Mutex<Option<String>>,
    replicas: Mutex<Vec<ReplicaEntry>>,
    commands: CommandCounter,
}

/// Discovery endpoint for a single group on an ephemeral localhost port.
pub struct FakeSentinel {
    server: ServerHandle,
    state: Arc<SentinelState>,
}

impl FakeSentinel {
    /// Starts a Sentinel that knows `group` but has no master yet.
    pub fn start(group: &str) -> anyhow::Result<Self> {
        let state = Arc::new(SentinelState {
            group: group.to_string(),
            master: Mutex::new(None),
            replicas: Mutex::new(Vec::new()),
            commands: CommandCounter::default(),
        });
        let server = serve(state.clone())?;
        info!(addr = server.addr(), group, "fake sentinel started");
        Ok(FakeSentinel { server, state })
    }

    /// Starts a Sentinel already reporting `master` and healthy `replicas`.
    pub fn with_topology(group: &str, master: &str, replicas: &[&str]) -> anyhow::Result<Self> {
        let sentinel = Self::start(group)?;
        sentinel.set_master(Some(master));
        sentinel.set_replicas(replicas);
        Ok(sentinel)
    }

    pub fn addr(&self) -> &str {
        self.server.addr()
    }

    pub fn set_master(&self, master: Option<&str>) {
        *self.state.master.lock() = master.map(str::to_string);
    }

    /// Replaces the replica list with healthy entries.
    pub fn set_replicas(&self, replicas: &[&str]) {
        let entries = replicas.iter().map(|addr| ReplicaEntry::healthy(addr)).collect();
        self.set_replica_entries(entries);
    }

    pub fn set_replica_entries(&self, entries: Vec<ReplicaEntry>) {
        *self.state.replicas.lock() = entries;
    }

    /// Master address queries received.
    pub fn master_queries(&self) -> usize {
        self.state.commands.get("get-master-addr-by-name")
    }

    /// Replica list queries received, under either subcommand name.
    pub fn replica_queries(&self) -> usize {
        self.state.commands.get("slaves") + self.state.commands.get("replicas")
    }

    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

impl Handler for SentinelState {
    fn handle(&self, args: &[Vec<u8>], _session: &mut Session) -> Vec<u8> {
        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match command.as_str() {
            "PING" => resp_simple("PONG"),
            "SENTINEL" => self.sentinel(&args[1..]),
            _ => resp_error(&format!("ERR unknown command '{}'", command)),
        }
    }
}

impl SentinelState {
    fn sentinel(&self, args: &[Vec<u8>]) -> Vec<u8> {
        let (subcommand, name) = match args {
            [subcommand, name, ..] => (
                String::from_utf8_lossy(subcommand).to_ascii_lowercase(),
                name.as_slice(),
            ),
            _ => return resp_error("ERR wrong number of arguments for 'sentinel' command"),
        };
        self.commands.record(subcommand.as_bytes());

        match subcommand.as_str() {
            "get-master-addr-by-name" => {
                let master = self.master.lock().clone();
                match master {
                    Some(addr) if name == self.group.as_bytes() => {
                        let (host, port) = split_addr(&addr);
                        resp_bulk_array(&[host, port])
                    }
                    _ => resp_null_array(),
                }
            }
            "slaves" | "replicas" => {
                if name != self.group.as_bytes() {
                    return resp_error("ERR No such master with that name");
                }
                let entries = self.replicas.lock().clone();
                resp_array(entries.iter().map(replica_fields).collect())
            }
            _ => resp_error(&format!("ERR unknown sentinel subcommand '{}'", subcommand)),
        }
    }
}

/// Flat field/value list in the shape `SENTINEL slaves` uses.
fn replica_fields(entry: &ReplicaEntry) -> Vec<u8> {
    let (ip, port) = split_addr(&entry.addr);
    resp_bulk_array(&[
        "name",
        entry.addr.as_str(),
        "ip",
        ip,
        "port",
        port,
        "flags",
        entry.flags.as_str(),
        "master-link-status",
        "ok",
    ])
}

fn split_addr(addr: &str) -> (&str, &str) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.trim_start_matches('[').trim_end_matches(']'), port),
        None => (addr, ""),
    }
}
