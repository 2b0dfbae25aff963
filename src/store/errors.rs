//! Snapshot store error types
//!
//! Error codes:
//! - SYNC_STORE_IO (ERROR severity)
//! - SYNC_STORE_NOT_FOUND (ERROR severity)
//! - SYNC_STORE_CORRUPT (FATAL severity)
//! - SYNC_STORE_SCHEMA (FATAL severity)

use std::fmt;
use std::io;

/// Store-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// I/O failure reading or writing the store file
    SyncStoreIo,
    /// The requested path has no snapshot recorded
    SyncStoreNotFound,
    /// A fully-present record failed its checksum or did not parse
    SyncStoreCorrupt,
    /// The store was written by an unknown schema version
    SyncStoreSchema,
}

impl StoreErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::SyncStoreIo => "SYNC_STORE_IO",
            StoreErrorCode::SyncStoreNotFound => "SYNC_STORE_NOT_FOUND",
            StoreErrorCode::SyncStoreCorrupt => "SYNC_STORE_CORRUPT",
            StoreErrorCode::SyncStoreSchema => "SYNC_STORE_SCHEMA",
        }
    }

    /// Whether this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreErrorCode::SyncStoreCorrupt | StoreErrorCode::SyncStoreSchema
        )
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Store error with context
#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl StoreError {
    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StoreErrorCode::SyncStoreIo,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::SyncStoreNotFound,
            message: message.into(),
            source: None,
        }
    }

    /// Create a corruption error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::SyncStoreCorrupt,
            message: message.into(),
            source: None,
        }
    }

    /// Create a schema-mismatch error
    pub fn schema(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::SyncStoreSchema,
            message: message.into(),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> StoreErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.code == StoreErrorCode::SyncStoreNotFound
    }

    /// Whether this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_fatal() { "FATAL" } else { "ERROR" };
        write!(f, "[{}] {}: {}", severity, self.code.code(), self.message)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
