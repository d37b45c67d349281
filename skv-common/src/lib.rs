// skv-common - Shared types and error taxonomy for the SentinelKV client
//
// This crate holds the vocabulary shared by the client and the test kit:
// roles, topology snapshots, and the error enum.

pub mod error;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use types::*;
