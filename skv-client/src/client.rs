//! # Dual-Pool Client
//!
//! Purpose: Own a write pool bound to the master and a read pool bound to a
//! replica, and route each command to the right one.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides discovery, pooling and protocol
//!    details behind per-role acquisition and command methods.
//! 2. **Two Policies, Two Pools**: Writes must reach the current master while
//!    reads may be spread across replicas; each pool carries its own dialer
//!    and validation role.
//! 3. **Table Routing**: One read-only command table decides the path; every
//!    command wrapper goes through it.
//!
//! ## Routing Notes
//! - Iteration commands (`SCAN`, `HSCAN`) and server commands (`PING`,
//!   `ECHO`, `INFO`) stay on the write path.
//! - A read right after a write may hit a replica that has not applied it yet.

use std::sync::Arc;

use tracing::info;

use skv_common::{Access, Role, SkvResult};

use crate::config::{Options, SentinelOptions};
use crate::dial::{ConnectionFactory, StaticDialer};
use crate::locator::TopologyLocator;
use crate::pool::{PooledConnection, ValidatedPool};
use crate::resp::RespValue;

/// Commands served by the read pool; everything else takes the write path.
const READ_COMMANDS: [&str; 8] = [
    "GET", "GETRANGE", "EXISTS", "KEYS", "HGET", "HGETALL", "HKEYS", "HEXISTS",
];

/// Returns the path a command is routed to (case-insensitive).
pub fn route(command: &[u8]) -> Access {
    if READ_COMMANDS
        .iter()
        .any(|name| name.as_bytes().eq_ignore_ascii_case(command))
    {
        Access::Read
    } else {
        Access::Write
    }
}

/// Client over a write pool and a read pool.
///
/// Each call acquires a connection from the routed pool, executes one
/// command, and returns the connection when the lease drops.
#[derive(Clone)]
pub struct Client {
    write_pool: ValidatedPool,
    read_pool: ValidatedPool,
}

impl Client {
    /// Creates a client for a Sentinel-managed deployment.
    ///
    /// The write pool dials the current master and re-checks the master role
    /// on every reuse; the read pool dials a random replica (or the master
    /// when none is available) and only probes liveness.
    pub fn sentinel(options: SentinelOptions) -> SkvResult<Self> {
        let transport = Arc::new(options.transport()?);
        let locator = Arc::new(TopologyLocator::new(
            options.discovery_endpoints(),
            Arc::new(transport.for_discovery()),
        ));
        let group = options.group().to_string();
        let pool_config = options.pool_config();

        let write_dialer =
            ConnectionFactory::new(locator.clone(), transport.clone(), group.clone(), Access::Write);
        let read_dialer = ConnectionFactory::new(locator, transport, group.clone(), Access::Read);

        let write_pool =
            ValidatedPool::new(pool_config.clone(), Box::new(write_dialer), Some(Role::Master));
        let read_pool = ValidatedPool::new(pool_config, Box::new(read_dialer), None);

        info!(group = %group, "sentinel client configured");
        Ok(Client {
            write_pool,
            read_pool,
        })
    }

    /// Creates a client for a single server; both paths share one pool.
    pub fn standalone(options: Options) -> SkvResult<Self> {
        let transport = Arc::new(options.transport()?);
        let dialer = StaticDialer::new(options.address(), transport);
        let pool = ValidatedPool::new(options.pool_config(), Box::new(dialer), None);
        Ok(Self::from_pool(pool))
    }

    /// Creates a client with default single-server options.
    pub fn connect_default() -> SkvResult<Self> {
        Self::standalone(Options::default())
    }

    /// Uses a caller-supplied pool for both paths.
    pub fn from_pool(pool: ValidatedPool) -> Self {
        Client {
            write_pool: pool.clone(),
            read_pool: pool,
        }
    }

    /// Uses caller-supplied pools.
    pub fn from_pools(write_pool: ValidatedPool, read_pool: ValidatedPool) -> Self {
        Client {
            write_pool,
            read_pool,
        }
    }

    pub fn write_pool(&self) -> &ValidatedPool {
        &self.write_pool
    }

    pub fn read_pool(&self) -> &ValidatedPool {
        &self.read_pool
    }

    /// Leases a connection to the current master.
    pub fn write_connection(&self) -> SkvResult<PooledConnection> {
        self.write_pool.acquire()
    }

    /// Leases a read connection (replica, or master when none is available).
    pub fn read_connection(&self) -> SkvResult<PooledConnection> {
        self.read_pool.acquire()
    }

    /// Leases a connection from the write path.
    pub fn connection(&self) -> SkvResult<PooledConnection> {
        self.write_connection()
    }

    pub fn connection_for(&self, access: Access) -> SkvResult<PooledConnection> {
        match access {
            Access::Write => self.write_connection(),
            Access::Read => self.read_connection(),
        }
    }

    /// Executes a raw command on the routed pool.
    ///
    /// Error replies become `SkvError::Server`.
    pub fn exec(&self, args: &[&[u8]]) -> SkvResult<RespValue> {
        let access = match args.first() {
            Some(command) => route(command),
            None => Access::Write,
        };
        let mut conn = self.connection_for(access)?;
        conn.exec(args)?.into_result()
    }

    /// Closes both pools.
    ///
    /// The read pool is closed even when closing the write pool fails; the
    /// first error is returned.
    pub fn close(&self) -> SkvResult<()> {
        let write_result = self.write_pool.close();
        let read_result = if self.read_pool.same_pool(&self.write_pool) {
            Ok(())
        } else {
            self.read_pool.close()
        };
        write_result.and(read_result)
    }
}
