//! fieldsync Core Library
//!
//! Offline-first inventory synchronization between field facilities
//! ("local machines") and a central node ("online web"). This library provides
//! the replicated event log, the consistency gate that admits stock movements
//! into it, and the import, replay, exchange and archival machinery that moves
//! events between nodes exactly once and in causal order.

pub mod config;
pub mod event;
pub mod gate;
pub mod ledger;
pub mod node;
pub mod store;
pub mod sync;
pub mod types;
pub mod version;

pub use config::{NodeConfig, NodeRole};
pub use event::{Event, EventCategory, EventTime};
pub use node::Node;
pub use types::*;
pub use version::version_string;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Network operation failed: {0}")]
    Network(String),

    #[error("Lock operation failed: {0}")]
    Lock(String),

    /// An ordering or sequencing invariant was broken. Never retried.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Batch rejected: {0}")]
    Rejected(gate::Rejection),

    #[error("Incompatible protocol version: {0}")]
    IncompatibleProtocol(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
