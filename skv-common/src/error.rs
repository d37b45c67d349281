//! # Error Taxonomy
//!
//! Purpose: One error type for every layer of the client, from RESP framing
//! up to pool capacity, so callers can match on a single enum.
//!
//! ## Propagation
//!
//! - Topology and connectivity failures (`DiscoveryUnavailable`,
//!   `ConnectFailed`) always reach the caller; nothing here retries.
//! - `RoleMismatch` is produced by write-pool validation and consumed by the
//!   pool itself (discard + redial). It only escapes when a caller runs the
//!   validator directly.
//! - Capacity and lifecycle failures (`PoolExhausted`, `AcquireTimeout`,
//!   `PoolClosed`) are surfaced immediately.

use thiserror::Error;

use crate::types::Role;

/// Result alias used across the workspace.
pub type SkvResult<T> = Result<T, SkvError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum SkvError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// Reply type did not match what the command produces.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No discovery endpoint answered for the group.
    #[error("no discovery endpoint available for group {group}: {reason}")]
    DiscoveryUnavailable { group: String, reason: String },

    /// Physical dial (connect, TLS, AUTH or SELECT) to a resolved address failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: Box<SkvError>,
    },

    /// A pooled connection no longer reports the role its pool requires.
    #[error("role mismatch: expected {expected}, node reports {actual}")]
    RoleMismatch { expected: Role, actual: Role },

    /// Capacity reached and waiting is disabled.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Bounded wait for pool capacity elapsed.
    #[error("timed out waiting for a pooled connection")]
    AcquireTimeout,

    /// Operation attempted after the pool was closed.
    #[error("connection pool closed")]
    PoolClosed,

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Invalid client options.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SkvError {
    /// Wraps a dial-stage failure with the address it targeted.
    pub fn connect_failed(addr: impl Into<String>, source: SkvError) -> Self {
        SkvError::ConnectFailed {
            addr: addr.into(),
            source: Box::new(source),
        }
    }

    /// Returns true when the error means the connection is no longer usable.
    ///
    /// Server error replies leave the stream in a consistent state; everything
    /// on the transport or framing level does not.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            SkvError::Io(_) | SkvError::Protocol | SkvError::Tls(_) | SkvError::ConnectFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failed_keeps_source() {
        let err = SkvError::connect_failed("10.0.0.1:6379", SkvError::Protocol);
        assert_eq!(err.to_string(), "failed to connect to 10.0.0.1:6379: protocol error");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn role_mismatch_message() {
        let err = SkvError::RoleMismatch {
            expected: Role::Master,
            actual: Role::Replica,
        };
        assert_eq!(err.to_string(), "role mismatch: expected master, node reports replica");
    }

    #[test]
    fn server_errors_are_not_fatal() {
        let server = SkvError::Server {
            message: "WRONGTYPE".to_string(),
        };
        assert!(!server.is_connection_fatal());
        assert!(SkvError::Protocol.is_connection_fatal());
    }
}
