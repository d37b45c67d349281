//! # Validated Connection Pool
//!
//! Purpose: Lend connections for one logical path (write or read), dialing new
//! ones on demand and validating reused ones before handing them out.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections or
//!    adjusting counters; dials and probes run unlocked.
//! 3. **RAII Leases**: `PooledConnection` returns or discards its connection
//!    exactly once, on every exit path.
//! 4. **Role-Parameterized Validation**: One validator, driven by the role the
//!    pool requires.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Created ──► Leased ──release(healthy)──► Idle ──acquire──► Leased
//!               │                           │
//!               └──release(unhealthy)──┐    ├──validation failed
//!                                      ▼    ├──idle timeout
//!                                  Discarded◄┴──pool closed
//! ```
//!
//! ## Validation Policy
//!
//! Applied on every acquisition that reuses an idle connection:
//! 1. If the pool requires a role, issue `ROLE` and compare. This runs on
//!    every reuse regardless of `validation_period`.
//! 2. If the connection was validated within `validation_period`, stop.
//! 3. Otherwise `PING`, and record the new validation instant.
//!
//! Any failure discards the connection and the acquisition continues with the
//! next idle connection or a fresh dial.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use skv_common::{Role, SkvError, SkvResult};

use crate::connection::Connection;
use crate::dial::Dial;
use crate::resp::RespValue;

/// Capacity and validation settings for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections older than this are closed; zero keeps them forever.
    pub idle_timeout: Duration,
    /// Maximum total connections (idle + in-use); zero means unbounded.
    pub max_active: usize,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Block in `acquire()` at capacity instead of failing.
    pub wait: bool,
    /// Skip the liveness probe for connections validated this recently.
    pub validation_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            idle_timeout: Duration::from_secs(240),
            max_active: 1000,
            max_idle: 100,
            wait: false,
            validation_period: Duration::from_secs(60),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections sitting in the idle set.
    pub idle: usize,
    /// All open connections owned by the pool, idle or leased.
    pub active: usize,
}

struct IdleConnection {
    conn: Connection,
    returned_at: Instant,
}

struct PoolState {
    // Most recently returned at the front, oldest at the back.
    idle: VecDeque<IdleConnection>,
    active: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    dialer: Box<dyn Dial>,
    required_role: Option<Role>,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ValidatedPool {
    inner: Arc<PoolInner>,
}

enum Slot {
    Reused(Connection),
    Fresh,
}

impl ValidatedPool {
    /// Creates a pool.
    ///
    /// `required_role` enables the per-acquisition role check; write pools
    /// pass `Some(Role::Master)`, read pools pass `None`.
    pub fn new(config: PoolConfig, dialer: Box<dyn Dial>, required_role: Option<Role>) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle.min(64)),
            active: 0,
            closed: false,
        };
        ValidatedPool {
            inner: Arc::new(PoolInner {
                config,
                dialer,
                required_role,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn required_role(&self) -> Option<Role> {
        self.inner.required_role
    }

    /// Acquires a connection, waiting without bound at capacity when
    /// `wait` is enabled.
    pub fn acquire(&self) -> SkvResult<PooledConnection> {
        self.acquire_until(None)
    }

    /// Acquires a connection, waiting at most `timeout` for capacity.
    ///
    /// The bound covers only the wait for a free slot; dials and probes are
    /// bounded by the transport timeouts.
    pub fn acquire_timeout(&self, timeout: Duration) -> SkvResult<PooledConnection> {
        self.acquire_until(Some(Instant::now() + timeout))
    }

    fn acquire_until(&self, deadline: Option<Instant>) -> SkvResult<PooledConnection> {
        loop {
            let mut expired = Vec::new();
            let slot = self.reserve(deadline, &mut expired);
            // Expired connections are closed only after the pool lock is released.
            for mut conn in expired {
                let _ = conn.shutdown();
            }
            match slot? {
                Slot::Reused(mut conn) => match self.validate(&mut conn) {
                    Ok(()) => return Ok(PooledConnection::new(self.inner.clone(), conn)),
                    Err(err) => {
                        warn!(addr = conn.addr(), error = %err, "discarding pooled connection");
                        self.inner.discard(conn);
                    }
                },
                Slot::Fresh => {
                    return match self.inner.dialer.dial() {
                        Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                        Err(err) => {
                            self.inner.release_slot();
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Takes an idle connection or a slot for a new dial.
    ///
    /// Idle connections past `idle_timeout` are moved into `expired`; the
    /// caller shuts them down once the lock is gone.
    fn reserve(&self, deadline: Option<Instant>, expired: &mut Vec<Connection>) -> SkvResult<Slot> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(SkvError::PoolClosed);
            }

            if prune_idle(&mut state, config.idle_timeout, Instant::now(), expired) > 0 {
                self.inner.available.notify_all();
            }

            if let Some(idle) = state.idle.pop_front() {
                return Ok(Slot::Reused(idle.conn));
            }

            if config.max_active == 0 || state.active < config.max_active {
                state.active += 1;
                return Ok(Slot::Fresh);
            }

            if !config.wait {
                return Err(SkvError::PoolExhausted);
            }

            match deadline {
                None => self.inner.available.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(SkvError::AcquireTimeout);
                    }
                    self.inner.available.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn validate(&self, conn: &mut Connection) -> SkvResult<()> {
        validate(
            conn,
            self.inner.required_role,
            self.inner.config.validation_period,
            Instant::now(),
        )
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active,
        }
    }

    /// Returns true when both handles refer to the same pool.
    pub fn same_pool(&self, other: &ValidatedPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Closes the pool.
    ///
    /// Idle connections are shut down now; leased ones are discarded when
    /// their lease ends. Waiters and later acquisitions get `PoolClosed`.
    /// Closing twice is a no-op. Returns the first shutdown error.
    pub fn close(&self) -> SkvResult<()> {
        let drained: Vec<IdleConnection> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let drained: Vec<IdleConnection> = state.idle.drain(..).collect();
            state.active = state.active.saturating_sub(drained.len());
            drained
        };
        self.inner.available.notify_all();

        info!(
            role = ?self.inner.required_role,
            closed = drained.len(),
            "connection pool closed"
        );

        let mut first_err = None;
        for mut idle in drained {
            if let Err(err) = idle.conn.shutdown() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Validates a reused connection against the pool policy.
///
/// Performs exactly one `ROLE` query when `required_role` is set, whatever
/// the elapsed time, then probes liveness only when the last validation is
/// older than `period`.
pub fn validate(
    conn: &mut Connection,
    required_role: Option<Role>,
    period: Duration,
    now: Instant,
) -> SkvResult<()> {
    if let Some(expected) = required_role {
        let actual = conn.role()?;
        if actual != expected {
            return Err(SkvError::RoleMismatch { expected, actual });
        }
    }

    if now.saturating_duration_since(conn.last_validated()) < period {
        debug!(addr = conn.addr(), "validation skipped, recently validated");
        return Ok(());
    }

    conn.ping()?;
    conn.mark_validated(now);
    Ok(())
}

/// Moves idle connections older than `idle_timeout` from the oldest end
/// into `expired`, returning how many were moved.
fn prune_idle(
    state: &mut PoolState,
    idle_timeout: Duration,
    now: Instant,
    expired: &mut Vec<Connection>,
) -> usize {
    if idle_timeout.is_zero() {
        return 0;
    }
    let before = expired.len();
    while let Some(oldest) = state.idle.back() {
        if now.saturating_duration_since(oldest.returned_at) < idle_timeout {
            break;
        }
        if let Some(idle) = state.idle.pop_back() {
            state.active = state.active.saturating_sub(1);
            debug!(addr = idle.conn.addr(), "closing idle connection past idle timeout");
            expired.push(idle.conn);
        }
    }
    expired.len() - before
}

impl PoolInner {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn discard(&self, mut conn: Connection) {
        self.release_slot();
        // Best effort: the connection is being thrown away.
        let _ = conn.shutdown();
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.closed || state.idle.len() >= self.config.max_idle {
            state.active = state.active.saturating_sub(1);
            drop(state);
            self.available.notify_one();
            let mut conn = conn;
            let _ = conn.shutdown();
            return;
        }
        state.idle.push_front(IdleConnection {
            conn,
            returned_at: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }
}

/// RAII lease returning a connection to the pool on drop.
///
/// A lease whose connection saw a transport or framing error is discarded
/// instead of returned, whether the error came through `exec` or through
/// the borrowed `connection()`.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes a RESP command and returns the parsed response.
    pub fn exec(&mut self, args: &[&[u8]]) -> SkvResult<RespValue> {
        self.connection().exec(args)
    }

    /// Borrows the underlying connection.
    pub fn connection(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until the lease ends")
    }

    /// Address of the leased connection.
    pub fn addr(&self) -> &str {
        self.conn.as_ref().map(Connection::addr).unwrap_or_default()
    }

    /// Ends the lease. An unhealthy connection (or one that already failed)
    /// is discarded; a healthy one returns to the idle set.
    pub fn release(mut self, healthy: bool) {
        self.valid = self.valid && healthy;
    }

    /// Ends the lease and permanently closes the connection.
    pub fn discard(self) {
        self.release(false);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid && !conn.is_broken() {
            self.pool.return_connection(conn);
        } else {
            self.pool.discard(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingDialer {
        calls: Arc<AtomicUsize>,
    }

    impl Dial for FailingDialer {
        fn dial(&self) -> SkvResult<Connection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SkvError::connect_failed("127.0.0.1:1", SkvError::Protocol))
        }
    }

    fn failing_pool(config: PoolConfig) -> (ValidatedPool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let dialer = FailingDialer {
            calls: calls.clone(),
        };
        (ValidatedPool::new(config, Box::new(dialer), None), calls)
    }

    #[test]
    fn dial_failure_releases_slot() {
        let config = PoolConfig {
            max_active: 1,
            ..Default::default()
        };
        let (pool, calls) = failing_pool(config);

        assert!(matches!(pool.acquire(), Err(SkvError::ConnectFailed { .. })));
        // The slot was returned, so the second attempt dials again instead of
        // reporting exhaustion.
        assert!(matches!(pool.acquire(), Err(SkvError::ConnectFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats(), PoolStats { idle: 0, active: 0 });
    }

    #[test]
    fn closed_pool_rejects_acquire() {
        let (pool, calls) = failing_pool(PoolConfig::default());
        pool.close().unwrap();
        assert!(matches!(pool.acquire(), Err(SkvError::PoolClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (pool, _) = failing_pool(PoolConfig::default());
        pool.close().unwrap();
        pool.close().unwrap();
    }

    #[test]
    fn reserve_hands_expired_connections_to_caller() {
        let node = skv_testkit::FakeNode::start(Role::Master).expect("node");
        let dialer = crate::dial::StaticDialer::new(
            node.addr(),
            Arc::new(crate::connection::TransportConfig::default()),
        );
        let config = PoolConfig {
            idle_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let pool = ValidatedPool::new(config, Box::new(dialer), None);

        drop(pool.acquire().expect("first"));
        std::thread::sleep(Duration::from_millis(60));

        let mut expired = Vec::new();
        let slot = pool.reserve(None, &mut expired).expect("reserve");
        assert!(matches!(slot, Slot::Fresh));
        assert_eq!(expired.len(), 1);
        // The pool already forgot the expired connection; only the new slot counts.
        assert_eq!(pool.stats(), PoolStats { idle: 0, active: 1 });
        for mut conn in expired {
            conn.shutdown().expect("shutdown");
        }
        pool.inner.release_slot();
        assert_eq!(pool.stats(), PoolStats { idle: 0, active: 0 });
    }

    #[test]
    fn clones_share_state() {
        let (pool, _) = failing_pool(PoolConfig::default());
        let other = pool.clone();
        assert!(pool.same_pool(&other));
        other.close().unwrap();
        assert!(matches!(pool.acquire(), Err(SkvError::PoolClosed)));
    }
}
