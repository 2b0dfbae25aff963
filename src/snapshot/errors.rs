//! Snapshot error types
//!
//! Error codes:
//! - SYNC_SNAPSHOT_VALIDATION (ERROR severity)
//! - SYNC_SNAPSHOT_IO (ERROR severity)
//! - SYNC_SNAPSHOT_MALFORMED (ERROR severity)
//! - SYNC_SNAPSHOT_SIGNATURE (FATAL severity)

use std::fmt;

/// Snapshot-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotErrorCode {
    /// Bad path or bad inputs to snapshot creation
    SyncSnapshotValidation,
    /// I/O failure while capturing or reading a snapshot
    SyncSnapshotIo,
    /// A remote snapshot object does not have the expected shape
    SyncSnapshotMalformed,
    /// Signature verification failed on fetched metadata
    SyncSnapshotSignature,
}

impl SnapshotErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SnapshotErrorCode::SyncSnapshotValidation => "SYNC_SNAPSHOT_VALIDATION",
            SnapshotErrorCode::SyncSnapshotIo => "SYNC_SNAPSHOT_IO",
            SnapshotErrorCode::SyncSnapshotMalformed => "SYNC_SNAPSHOT_MALFORMED",
            SnapshotErrorCode::SyncSnapshotSignature => "SYNC_SNAPSHOT_SIGNATURE",
        }
    }

    /// Whether this error halts the folder rather than the operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SnapshotErrorCode::SyncSnapshotSignature)
    }
}

impl fmt::Display for SnapshotErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Snapshot error with context
#[derive(Debug)]
pub struct SnapshotError {
    code: SnapshotErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SnapshotError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: SnapshotErrorCode::SyncSnapshotValidation,
            message: message.into(),
            source: None,
        }
    }

    /// Create an I/O error
    pub fn io(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: SnapshotErrorCode::SyncSnapshotIo,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a malformed-snapshot error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            code: SnapshotErrorCode::SyncSnapshotMalformed,
            message: message.into(),
            source: None,
        }
    }

    /// Create a signature-verification error
    pub fn signature(message: impl Into<String>) -> Self {
        Self {
            code: SnapshotErrorCode::SyncSnapshotSignature,
            message: message.into(),
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> SnapshotErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the containing folder must halt.
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_fatal() { "FATAL" } else { "ERROR" };
        write!(f, "[{}] {}: {}", severity, self.code.code(), self.message)
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;
