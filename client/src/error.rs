//! Error handling for the sync client.

use std::time::Duration;

/// Sync error type.
///
/// `Clone` so that one in-flight result can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected the request: {0}")]
    Rejected(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine error: {0}")]
    Engine(#[from] staysharp_engine::Error),
}

impl SyncError {
    /// Whether the outbox should keep retrying on its own. Authorization
    /// failures need the user.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::Unauthorized)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
