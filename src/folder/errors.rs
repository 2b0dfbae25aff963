//! Folder-level error types
//!
//! The folder engine surfaces five kinds: configuration, validation,
//! not-found, transient, and fatal. Transient failures are retried by the
//! engine's own timers; fatal failures halt the folder until an operator
//! intervenes.

use thiserror::Error;

use crate::store::{StoreError, StoreErrorCode};

/// Result type for folder operations
pub type FolderResult<T> = Result<T, FolderError>;

/// Errors surfaced by a folder engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FolderError {
    /// Bad configuration value or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad path or bad request; never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing snapshot, path, or folder
    #[error("not found: {0}")]
    NotFound(String),

    /// Likely to succeed later; retried with backoff
    #[error("transient failure: {0}")]
    Transient(String),

    /// The folder is halted and requires operator intervention
    #[error("folder halted: {0}")]
    Fatal(String),
}

impl FolderError {
    /// Stable error code for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            FolderError::Config(_) => "SYNC_CONFIG",
            FolderError::Validation(_) => "SYNC_VALIDATION",
            FolderError::NotFound(_) => "SYNC_NOT_FOUND",
            FolderError::Transient(_) => "SYNC_TRANSIENT",
            FolderError::Fatal(_) => "SYNC_FATAL",
        }
    }
}

impl From<StoreError> for FolderError {
    fn from(e: StoreError) -> Self {
        match e.code() {
            // An unknown schema is an operator problem, not corruption.
            StoreErrorCode::SyncStoreSchema => FolderError::Config(e.to_string()),
            StoreErrorCode::SyncStoreCorrupt => FolderError::Fatal(e.to_string()),
            StoreErrorCode::SyncStoreNotFound => FolderError::NotFound(e.to_string()),
            StoreErrorCode::SyncStoreIo => FolderError::Transient(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            FolderError::from(StoreError::schema("v9")),
            FolderError::Config(_)
        ));
        assert!(matches!(
            FolderError::from(StoreError::corrupt("bad crc")),
            FolderError::Fatal(_)
        ));
        assert!(matches!(
            FolderError::from(StoreError::not_found("x")),
            FolderError::NotFound(_)
        ));
    }

    #[test]
    fn test_codes() {
        assert_eq!(FolderError::Config("x".into()).code(), "SYNC_CONFIG");
        assert_eq!(FolderError::Fatal("x".into()).code(), "SYNC_FATAL");
    }
}
