//! # Connection Factory
//!
//! Purpose: Turn "give me a connection for this path" into a resolved address
//! and a freshly dialed `Connection`.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Pools only see the `Dial` trait, so write, read and
//!    single-server pools share one pool implementation.
//! 2. **Explicit Dependencies**: The factory owns handles to its locator and
//!    transport instead of capturing ambient configuration.
//! 3. **One RNG**: Replica choice draws from a generator seeded once at
//!    construction, keeping the choice uniform across rapid repeated dials.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use skv_common::{Access, SkvResult};

use crate::connection::{Connection, TransportConfig};
use crate::locator::TopologyLocator;

/// Source of new physical connections for a pool.
pub trait Dial: Send + Sync {
    /// Opens one new connection.
    fn dial(&self) -> SkvResult<Connection>;
}

/// Role-aware dialer backed by discovery.
///
/// - `Access::Write` always dials the current master.
/// - `Access::Read` dials a uniformly chosen replica, falling back to the
///   master when no replica is available.
pub struct ConnectionFactory {
    locator: Arc<TopologyLocator>,
    transport: Arc<TransportConfig>,
    group: String,
    access: Access,
    rng: Mutex<StdRng>,
}

impl ConnectionFactory {
    /// Creates a factory seeded from OS entropy.
    pub fn new(
        locator: Arc<TopologyLocator>,
        transport: Arc<TransportConfig>,
        group: impl Into<String>,
        access: Access,
    ) -> Self {
        Self::with_rng(locator, transport, group, access, StdRng::from_entropy())
    }

    /// Creates a factory with a fixed seed for reproducible replica choice.
    pub fn with_seed(
        locator: Arc<TopologyLocator>,
        transport: Arc<TransportConfig>,
        group: impl Into<String>,
        access: Access,
        seed: u64,
    ) -> Self {
        Self::with_rng(locator, transport, group, access, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        locator: Arc<TopologyLocator>,
        transport: Arc<TransportConfig>,
        group: impl Into<String>,
        access: Access,
        rng: StdRng,
    ) -> Self {
        ConnectionFactory {
            locator,
            transport,
            group: group.into(),
            access,
            rng: Mutex::new(rng),
        }
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Resolves the address the next dial would target.
    pub fn select_address(&self) -> SkvResult<String> {
        match self.access {
            Access::Write => self.locator.resolve_master(&self.group),
            Access::Read => {
                let replicas = self.locator.resolve_replicas(&self.group)?;
                match self.pick(&replicas) {
                    Some(addr) => Ok(addr),
                    None => {
                        debug!(group = %self.group, "no replicas available, reading from master");
                        self.locator.resolve_master(&self.group)
                    }
                }
            }
        }
    }

    fn pick(&self, replicas: &[String]) -> Option<String> {
        let mut rng = self.rng.lock();
        replicas.choose(&mut *rng).cloned()
    }
}

impl Dial for ConnectionFactory {
    fn dial(&self) -> SkvResult<Connection> {
        let addr = self.select_address()?;
        debug!(group = %self.group, access = ?self.access, addr = %addr, "dialing");
        Connection::connect(&addr, &self.transport)
    }
}

/// Dialer bound to one fixed address (single-server deployments).
pub struct StaticDialer {
    addr: String,
    transport: Arc<TransportConfig>,
}

impl StaticDialer {
    pub fn new(addr: impl Into<String>, transport: Arc<TransportConfig>) -> Self {
        StaticDialer {
            addr: addr.into(),
            transport,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Dial for StaticDialer {
    fn dial(&self) -> SkvResult<Connection> {
        Connection::connect(&self.addr, &self.transport)
    }
}
