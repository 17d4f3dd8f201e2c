//! Error types for the StaySharp engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the engine.
///
/// Malformed input records are never an error: the normalizer absorbs them.
/// Storage failures are absorbed by [`crate::storage::DurableStore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    // State errors
    #[error("corrupt local state: {0}")]
    CorruptState(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether this error requires wiping local sync state and rebuilding
    /// from a full remote fetch.
    pub fn requires_recovery(&self) -> bool {
        matches!(self, Error::CorruptState(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
