//! Folder subsystem
//!
//! A folder is one synchronized directory tree: its configuration, its
//! engine (the single task that owns the store, stash, and timers), and
//! the process-wide registry of running engines.

mod config;
mod engine;
mod errors;
mod registry;

pub use config::{FolderConfig, RetryConfig};
pub use engine::{FolderCommand, FolderEngine, FolderStatus};
pub use errors::{FolderError, FolderResult};
pub use registry::{FolderHandle, FolderRegistry};
