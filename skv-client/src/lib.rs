//! # SentinelKV Sync Client
//!
//! Purpose: Provide a synchronous, Sentinel-aware client for a single-leader
//! replicated key-value store, with one connection pool per path: writes
//! always reach the current master, reads go to a replica when one exists.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections to avoid repeated connects.
//! 2. **Fresh Topology**: Every dial asks the discovery endpoints again, so a
//!    failover is picked up by the next new connection.
//! 3. **Self-Healing Writes**: Pooled write connections re-check the master
//!    role on every lease; a demoted node is discarded and replaced.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//!
//! ## Layering
//!
//! ```text
//! Client ──► ValidatedPool (write, role = master) ──► ConnectionFactory ──► TopologyLocator
//!        └─► ValidatedPool (read)                 ──► ConnectionFactory ──┘
//! ```

mod client;
mod commands;
mod config;
mod connection;
mod dial;
mod locator;
mod pool;
mod resp;
mod tls;

pub use client::{route, Client};
pub use config::{
    Options, SentinelOptions, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT, DEFAULT_MASTER_NAME,
    DEFAULT_MAX_ACTIVE, DEFAULT_MAX_IDLE, DEFAULT_PORT, DEFAULT_SENTINEL_ADDRESS,
    DEFAULT_SENTINEL_MAX_ACTIVE, DEFAULT_TIMEOUT, DEFAULT_VALIDATION_PERIOD,
};
pub use connection::{Connection, Network, TransportConfig};
pub use dial::{ConnectionFactory, Dial, StaticDialer};
pub use locator::TopologyLocator;
pub use pool::{validate, PoolConfig, PoolStats, PooledConnection, ValidatedPool};
pub use resp::RespValue;
pub use tls::{TlsConnector, TlsSettings};

pub use skv_common::{Access, Role, SkvError, SkvResult, Topology};
