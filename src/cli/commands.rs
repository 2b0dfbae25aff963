//! CLI command implementations
//!
//! The CLI is a thin boundary over the core: `init` writes a folder
//! configuration with a fresh key pair, `status` reads a folder's store,
//! `list` enumerates configurations. Running engines are driven by the
//! surrounding service, not by these one-shot commands.

use std::path::Path;

use serde_json::json;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::author::LocalAuthor;
use crate::capability::Capability;
use crate::folder::{FolderConfig, RetryConfig};
use crate::store::SnapshotStore;

/// Dispatch one parsed command.
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Init {
            config,
            name,
            magic,
            state,
            author,
            collective,
            personal,
            poll_interval,
            scan_interval,
        } => init(
            &config,
            &name,
            &magic,
            &state,
            &author,
            &collective,
            &personal,
            poll_interval,
            scan_interval,
        ),
        Command::Status { config } => status(&config),
        Command::List { config_dir } => list(&config_dir),
    }
}

/// Create a folder configuration, a fresh author key pair, and the state
/// directory.
#[allow(clippy::too_many_arguments)]
pub fn init(
    config_path: &Path,
    name: &str,
    magic: &Path,
    state: &Path,
    author_name: &str,
    collective: &str,
    personal: &str,
    poll_interval: u64,
    scan_interval: u64,
) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::already_initialized(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let collective = Capability::parse(collective)
        .map_err(|e| CliError::config_error(format!("collective: {}", e)))?;
    let personal = Capability::parse(personal)
        .map_err(|e| CliError::config_error(format!("personal: {}", e)))?;

    let author = LocalAuthor::generate(author_name);
    let config = FolderConfig {
        name: name.to_string(),
        magic_path: magic.to_path_buf(),
        state_path: state.to_path_buf(),
        author_name: author_name.to_string(),
        signing_key: author.signing_key_base64(),
        collective,
        personal,
        poll_interval_seconds: poll_interval,
        scan_interval_seconds: scan_interval,
        upload_retry: RetryConfig::default(),
        ancestry_depth: 1000,
    };

    std::fs::create_dir_all(magic)
        .map_err(|e| CliError::io_error(format!("cannot create {}: {}", magic.display(), e)))?;
    std::fs::create_dir_all(state)
        .map_err(|e| CliError::io_error(format!("cannot create {}: {}", state.display(), e)))?;

    // Creating the store now surfaces schema problems at init time rather
    // than on first sync.
    SnapshotStore::open(config.store_path())
        .map_err(|e| CliError::folder_error(e.to_string()))?;

    config
        .save(config_path)
        .map_err(|e| CliError::config_error(e.to_string()))?;

    println!(
        "{}",
        json!({
            "status": "ok",
            "folder": name,
            "config": config_path.display().to_string(),
            "author_verify_key": author.verify_key_base64(),
        })
    );
    Ok(())
}

/// Print a folder's pending snapshots, remote caps, and conflicts as JSON.
pub fn status(config_path: &Path) -> CliResult<()> {
    let config =
        FolderConfig::load(config_path).map_err(|e| CliError::config_error(e.to_string()))?;
    let store = SnapshotStore::open(config.store_path())
        .map_err(|e| CliError::folder_error(e.to_string()))?;

    let pending: Vec<_> = store
        .all_local_paths()
        .into_iter()
        .map(|path| {
            let chain = store.local_chain(&path).map(|c| c.len()).unwrap_or(0);
            json!({ "path": path.as_str(), "chain_length": chain })
        })
        .collect();
    let remotes: Vec<_> = store
        .remote_paths()
        .into_iter()
        .filter_map(|path| {
            store.get_remote(&path).ok().map(|cap| {
                json!({ "path": path.as_str(), "snapshot": cap.to_string() })
            })
        })
        .collect();
    let conflicts: Vec<_> = store
        .conflicts()
        .iter()
        .map(|c| {
            json!({
                "path": c.path.as_str(),
                "participant": c.participant,
                "detected_at": c.detected_at,
            })
        })
        .collect();

    println!(
        "{}",
        json!({
            "folder": config.name,
            "pending": pending,
            "remotes": remotes,
            "conflicts": conflicts,
        })
    );
    Ok(())
}

/// List folder configurations found in a directory.
pub fn list(config_dir: &Path) -> CliResult<()> {
    let entries = std::fs::read_dir(config_dir)
        .map_err(|e| CliError::io_error(format!("cannot read {}: {}", config_dir.display(), e)))?;

    let mut folders = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Ok(config) = FolderConfig::load(&path) {
            folders.push(json!({
                "name": config.name,
                "magic_path": config.magic_path.display().to_string(),
                "config": path.display().to_string(),
            }));
        }
    }
    folders.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    if folders.is_empty() {
        println!("No folders configured");
    } else {
        println!("{}", json!({ "folders": folders }));
    }
    Ok(())
}
