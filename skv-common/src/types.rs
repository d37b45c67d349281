//! # Topology Types
//!
//! Core vocabulary for a single-leader replication group: which node a
//! connection talks to (`Role`), which path an operation takes (`Access`),
//! and a point-in-time view of the group (`Topology`).
//!
//! ## Design Principles
//!
//! 1. **Tagged Roles**: A role is a two-value enum, never a string compared in
//!    several places.
//! 2. **Ephemeral Topology**: A `Topology` is a snapshot produced by one
//!    discovery query; nothing caches it.
//! 3. **Address Strings**: Addresses stay `host:port` strings so DNS names
//!    survive until dial time.

use std::fmt;

/// Replication role reported by a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single node accepting writes.
    Master,
    /// A node receiving a copy of the master's data.
    Replica,
}

impl Role {
    /// Parses the first element of a `ROLE` reply.
    ///
    /// Older servers say `slave`, newer ones may say `replica`.
    pub fn from_reply(name: &[u8]) -> Option<Role> {
        if name.eq_ignore_ascii_case(b"master") {
            return Some(Role::Master);
        }
        if name.eq_ignore_ascii_case(b"slave") || name.eq_ignore_ascii_case(b"replica") {
            return Some(Role::Replica);
        }
        None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pool an operation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Mutating (or deliberately master-pinned) operations.
    Write,
    /// Read-only operations that tolerate replica lag.
    Read,
}

/// Snapshot of a replication group as reported by one discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Current master, never empty when discovery succeeds.
    pub master: String,
    /// Currently available replicas, in the order the endpoint reported them.
    pub replicas: Vec<String>,
}

impl Topology {
    /// Returns true when reads must fall back to the master.
    pub fn has_replicas(&self) -> bool {
        !self.replicas.is_empty()
    }
}

/// Joins a host and port into a dialable address.
///
/// IPv6 literals are bracketed so the result parses as a socket address.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_names() {
        assert_eq!(Role::from_reply(b"master"), Some(Role::Master));
        assert_eq!(Role::from_reply(b"slave"), Some(Role::Replica));
        assert_eq!(Role::from_reply(b"REPLICA"), Some(Role::Replica));
        assert_eq!(Role::from_reply(b"sentinel"), None);
    }

    #[test]
    fn joins_ipv4_and_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", "6379"), "10.0.0.1:6379");
        assert_eq!(join_host_port("::1", "6379"), "[::1]:6379");
        assert_eq!(join_host_port("[::1]", "6379"), "[::1]:6379");
    }

    #[test]
    fn empty_replica_set_is_reported() {
        let topology = Topology {
            master: "10.0.0.1:6379".to_string(),
            replicas: Vec::new(),
        };
        assert!(!topology.has_replicas());
    }
}
