//! CLI-specific error types

use std::fmt;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Target already initialized
    AlreadyInitialized,
    /// Folder state error
    FolderError,
    /// I/O error
    IoError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "SYNC_CLI_CONFIG_ERROR",
            Self::AlreadyInitialized => "SYNC_CLI_ALREADY_INITIALIZED",
            Self::FolderError => "SYNC_CLI_FOLDER_ERROR",
            Self::IoError => "SYNC_CLI_IO_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, message)
    }

    /// Create an already-initialized error
    pub fn already_initialized(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::AlreadyInitialized, message)
    }

    /// Create a folder error
    pub fn folder_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::FolderError, message)
    }

    /// Create an I/O error
    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, message)
    }

    /// The error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
