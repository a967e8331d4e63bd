use std::io;

use thiserror::Error;

use crate::types::NodeId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Failure reported by the SQLite backing store.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A property or edge that the label's schema does not declare.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    /// Stored data references a schema element the running schema cannot represent.
    #[error("backward compatibility error: {0}")]
    BackwardCompatibility(String),
    /// The persisted storage format differs from the running one.
    #[error("storage format version mismatch: stored {stored}, expected {expected}")]
    StorageVersionMismatch {
        /// Version found in the store metadata.
        stored: i64,
        /// Version this build writes.
        expected: i64,
    },
    /// The codec cannot encode a value.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Stored bytes are malformed.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Node id is neither resident nor stored.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// Lookup against a key that has no index.
    #[error("no index on property '{0}'")]
    IndexMissing(String),
    /// Invalid caller argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// The graph was already closed.
    #[error("graph is closed")]
    Closed,
}

impl GraphError {
    /// Returns true for errors that make stored data unloadable under the running schema.
    pub fn is_backward_compatibility(&self) -> bool {
        matches!(self, GraphError::BackwardCompatibility(_))
    }
}
