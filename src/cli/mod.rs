//! CLI module for gridsync
//!
//! Provides the command-line boundary:
//! - init: create a folder configuration and state directory
//! - status: show a folder's pending/remote/conflict state
//! - list: enumerate configured folders

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{init, list, run_command, status};
pub use errors::{CliError, CliErrorCode, CliResult};
