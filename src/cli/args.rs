//! CLI argument definitions using clap
//!
//! Commands:
//! - gridsync init --config <path> ...
//! - gridsync status --config <path>
//! - gridsync list --config-dir <dir>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gridsync - synchronize a directory through a capability grid
#[derive(Parser, Debug)]
#[command(name = "gridsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a folder configuration and its state directory
    Init {
        /// Path the configuration file is written to
        #[arg(long, default_value = "./folder.json")]
        config: PathBuf,

        /// Folder name
        #[arg(long)]
        name: String,

        /// The directory to synchronize
        #[arg(long)]
        magic: PathBuf,

        /// The state directory (store and stash)
        #[arg(long)]
        state: PathBuf,

        /// Author name
        #[arg(long)]
        author: String,

        /// Read capability of the collective directory
        #[arg(long)]
        collective: String,

        /// Write capability of our personal directory
        #[arg(long)]
        personal: String,

        /// Seconds between remote polls (0 disables)
        #[arg(long, default_value_t = 60)]
        poll_interval: u64,

        /// Seconds between local scans (0 disables)
        #[arg(long, default_value_t = 60)]
        scan_interval: u64,
    },

    /// Show a folder's pending snapshots, remote caps, and conflicts
    Status {
        /// Path to the folder configuration file
        #[arg(long, default_value = "./folder.json")]
        config: PathBuf,
    },

    /// List the folders configured in a directory
    List {
        /// Directory containing folder configuration files
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
