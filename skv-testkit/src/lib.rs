//! # SKV Testkit
//!
//! In-process stand-ins for a replication group and its Sentinels, used by
//! the client's integration tests.
//!
//! Each fake owns a small tokio runtime serving RESP2 on an ephemeral
//! localhost port. Dropping the fake (or calling `shutdown`) stops the
//! runtime, closing its listener and every connection it accepted.

pub mod node;
pub mod protocol;
pub mod sentinel;
pub mod server;

pub use node::FakeNode;
pub use sentinel::{FakeSentinel, ReplicaEntry};

use std::net::TcpListener;

use tracing_subscriber::EnvFilter;

/// Installs a `RUST_LOG`-driven subscriber writing to the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns a localhost address nothing is listening on.
pub fn unused_addr() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);
    Ok(addr)
}
