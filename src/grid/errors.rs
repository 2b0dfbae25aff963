//! Grid client error types
//!
//! Every grid operation fails either transiently (worth retrying with
//! backoff) or permanently (retrying cannot help). The engine's retry policy
//! keys off this distinction and nothing else.

use thiserror::Error;

/// Result type for grid operations
pub type GridResult<T> = Result<T, GridError>;

/// Errors surfaced by a grid client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Likely to succeed later (network outage, overloaded storage server)
    #[error("transient grid failure: {0}")]
    Transient(String),

    /// Retrying cannot help (missing object, authority refused, mismatched
    /// conditional write)
    #[error("permanent grid failure: {0}")]
    Permanent(String),
}

impl GridError {
    /// Whether the operation should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GridError::Transient(_))
    }
}
