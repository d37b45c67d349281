//! # Client Options
//!
//! Purpose: Describe how to reach a deployment and how to pool connections to
//! it, and turn that description into the immutable `TransportConfig` and
//! `PoolConfig` values the pools run on.
//!
//! ## Conventions
//! - Every field has a default, so partial JSON documents are accepted.
//! - Durations are integer milliseconds on the wire.
//! - Zero means "off": no socket timeout, no idle expiry, unbounded
//!   `max_active`, no idle connections kept for `max_idle`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use skv_common::{join_host_port, SkvError, SkvResult};

use crate::connection::{timeout_of, Network, TransportConfig};
use crate::pool::PoolConfig;
use crate::tls::{TlsConnector, TlsSettings};

pub const DEFAULT_SENTINEL_ADDRESS: &str = "localhost:26379";
pub const DEFAULT_MASTER_NAME: &str = "master";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);
pub const DEFAULT_MAX_IDLE: usize = 100;
pub const DEFAULT_SENTINEL_MAX_ACTIVE: usize = 10_000;
pub const DEFAULT_MAX_ACTIVE: usize = 1_000;
pub const DEFAULT_VALIDATION_PERIOD: Duration = Duration::from_secs(60);

/// Options for a Sentinel-managed (replicated) deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelOptions {
    /// Discovery endpoints, tried in order.
    pub addresses: Vec<String>,
    /// Replication group name as known to the Sentinels.
    pub master_name: String,
    pub password: Option<String>,
    pub database: u32,
    pub network: Network,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub write_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    pub max_idle: usize,
    pub max_active: usize,
    pub wait: bool,
    pub tls: Option<TlsSettings>,
    #[serde(with = "duration_ms")]
    pub validation_period: Duration,
}

impl Default for SentinelOptions {
    fn default() -> Self {
        SentinelOptions {
            addresses: vec![DEFAULT_SENTINEL_ADDRESS.to_string()],
            master_name: DEFAULT_MASTER_NAME.to_string(),
            password: None,
            database: 0,
            network: Network::Tcp,
            connect_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle: DEFAULT_MAX_IDLE,
            max_active: DEFAULT_SENTINEL_MAX_ACTIVE,
            wait: false,
            tls: None,
            validation_period: DEFAULT_VALIDATION_PERIOD,
        }
    }
}

impl SentinelOptions {
    /// Parses options from a JSON document.
    pub fn from_json_str(json: &str) -> SkvResult<Self> {
        serde_json::from_str(json).map_err(|e| SkvError::Config(e.to_string()))
    }

    /// Reads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SkvResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SkvError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Discovery endpoints, falling back to the well-known local endpoint.
    pub fn discovery_endpoints(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            vec![DEFAULT_SENTINEL_ADDRESS.to_string()]
        } else {
            self.addresses.clone()
        }
    }

    /// Group name, falling back to the default when blank.
    pub fn group(&self) -> &str {
        if self.master_name.is_empty() {
            DEFAULT_MASTER_NAME
        } else {
            &self.master_name
        }
    }

    /// Builds the data-plane transport (TLS config is loaded here, once).
    pub fn transport(&self) -> SkvResult<TransportConfig> {
        build_transport(
            self.network,
            &self.password,
            self.database,
            [self.connect_timeout, self.read_timeout, self.write_timeout],
            self.tls.as_ref(),
        )
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            idle_timeout: self.idle_timeout,
            max_active: self.max_active,
            max_idle: self.max_idle,
            wait: self.wait,
            validation_period: self.validation_period,
        }
    }
}

/// Options for a single-server deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Host name, or the socket path when `network` is `unix`.
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u32,
    pub network: Network,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub write_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    pub max_idle: usize,
    pub max_active: usize,
    pub wait: bool,
    pub tls: Option<TlsSettings>,
    #[serde(with = "duration_ms")]
    pub validation_period: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            database: 0,
            network: Network::Tcp,
            connect_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle: DEFAULT_MAX_IDLE,
            max_active: DEFAULT_MAX_ACTIVE,
            wait: false,
            tls: None,
            validation_period: DEFAULT_VALIDATION_PERIOD,
        }
    }
}

impl Options {
    pub fn from_json_str(json: &str) -> SkvResult<Self> {
        serde_json::from_str(json).map_err(|e| SkvError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SkvResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SkvError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Dial target: `host:port` for TCP, the socket path for Unix.
    pub fn address(&self) -> String {
        let host = if self.host.is_empty() {
            DEFAULT_HOST
        } else {
            &self.host
        };
        match self.network {
            Network::Tcp => join_host_port(host, &self.port.to_string()),
            Network::Unix => host.to_string(),
        }
    }

    pub fn transport(&self) -> SkvResult<TransportConfig> {
        build_transport(
            self.network,
            &self.password,
            self.database,
            [self.connect_timeout, self.read_timeout, self.write_timeout],
            self.tls.as_ref(),
        )
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            idle_timeout: self.idle_timeout,
            max_active: self.max_active,
            max_idle: self.max_idle,
            wait: self.wait,
            validation_period: self.validation_period,
        }
    }
}

fn build_transport(
    network: Network,
    password: &Option<String>,
    database: u32,
    [connect, read, write]: [Duration; 3],
    tls: Option<&TlsSettings>,
) -> SkvResult<TransportConfig> {
    if tls.is_some() && network == Network::Unix {
        return Err(SkvError::Config("tls requires the tcp network".to_string()));
    }
    let tls = match tls {
        Some(settings) => Some(TlsConnector::new(settings)?),
        None => None,
    };
    Ok(TransportConfig {
        network,
        // An empty credential means no AUTH.
        password: password.clone().filter(|p| !p.is_empty()),
        database,
        connect_timeout: timeout_of(connect),
        read_timeout: timeout_of(read),
        write_timeout: timeout_of(write),
        tls,
    })
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_defaults() {
        let options = SentinelOptions::default();
        assert_eq!(options.discovery_endpoints(), vec!["localhost:26379".to_string()]);
        assert_eq!(options.group(), "master");
        assert_eq!(options.max_active, 10_000);
        assert_eq!(options.max_idle, 100);
        assert_eq!(options.idle_timeout, Duration::from_secs(240));
        assert_eq!(options.validation_period, Duration::from_secs(60));
        assert!(!options.wait);
    }

    #[test]
    fn blank_values_fall_back() {
        let options = SentinelOptions {
            addresses: Vec::new(),
            master_name: String::new(),
            ..Default::default()
        };
        assert_eq!(options.discovery_endpoints(), vec![DEFAULT_SENTINEL_ADDRESS.to_string()]);
        assert_eq!(options.group(), DEFAULT_MASTER_NAME);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options = SentinelOptions::from_json_str(
            r#"{"addresses": ["s1:26379", "s2:26379"], "master_name": "cache", "read_timeout": 250}"#,
        )
        .unwrap();
        assert_eq!(options.addresses.len(), 2);
        assert_eq!(options.group(), "cache");
        assert_eq!(options.read_timeout, Duration::from_millis(250));
        assert_eq!(options.connect_timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.network, Network::Tcp);
    }

    #[test]
    fn unknown_network_is_config_error() {
        let err = SentinelOptions::from_json_str(r#"{"network": "udp"}"#).unwrap_err();
        assert!(matches!(err, SkvError::Config(_)));
    }

    #[test]
    fn json_roundtrip_preserves_tls() {
        let options = SentinelOptions {
            tls: Some(TlsSettings {
                skip_verify: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(SentinelOptions::from_json_str(&json).unwrap(), options);
    }

    #[test]
    fn transport_applies_zero_and_credentials() {
        let options = SentinelOptions {
            password: Some(String::new()),
            database: 2,
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        let transport = options.transport().unwrap();
        assert!(transport.password.is_none());
        assert_eq!(transport.database, 2);
        assert_eq!(transport.connect_timeout, None);
        assert_eq!(transport.read_timeout, Some(DEFAULT_TIMEOUT));
        assert!(transport.tls.is_none());
    }

    #[test]
    fn standalone_address() {
        let options = Options {
            host: "cache.internal".to_string(),
            port: 6380,
            ..Default::default()
        };
        assert_eq!(options.address(), "cache.internal:6380");
        assert_eq!(Options::default().address(), "localhost:6379");
        assert_eq!(Options::default().max_active, 1_000);
    }

    #[test]
    fn unix_network_uses_host_as_path() {
        let options = Options {
            host: "/tmp/skv.sock".to_string(),
            network: Network::Unix,
            ..Default::default()
        };
        assert_eq!(options.address(), "/tmp/skv.sock");
    }

    #[test]
    fn tls_over_unix_is_rejected() {
        let options = Options {
            network: Network::Unix,
            tls: Some(TlsSettings::default()),
            ..Default::default()
        };
        assert!(matches!(options.transport(), Err(SkvError::Config(_))));
    }

    #[test]
    fn options_load_from_file() {
        let path = std::env::temp_dir().join(format!("skv-options-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"host": "10.1.2.3", "port": 7000, "wait": true}"#).unwrap();
        let options = Options::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(options.address(), "10.1.2.3:7000");
        assert!(options.wait);
    }
}
