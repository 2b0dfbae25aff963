//! Capability error types

use thiserror::Error;

/// Result type for capability operations
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors produced by parsing or converting capability strings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("not a capability string: {0:?}")]
    Parse(String),

    #[error("expected a {expected} capability, got {actual}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot derive a {target} capability from a {from} capability")]
    IllegalConversion {
        from: &'static str,
        target: &'static str,
    },
}
