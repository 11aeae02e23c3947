//! Error types for the memory store.

use thiserror::Error;

/// Main error type for memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The backend could not be reached within the configured timeout.
    ///
    /// Read/write/delete paths absorb this internally (local fallback or
    /// queueing); it only surfaces from direct connector use.
    #[error("backend unavailable")]
    Unavailable,

    #[error("no attribute named `{0}`")]
    NotFound(String),

    #[error("value is not JSON-serializable: {0}")]
    Serialization(String),

    /// Names starting with `_` are reserved for internal use.
    #[error("reserved attribute name `{0}`")]
    ReservedName(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

/// Result type for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
