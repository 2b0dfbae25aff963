//! Folder configuration
//!
//! One JSON document per synchronized folder: identity, paths,
//! capabilities, and timing. Zero intervals disable the corresponding
//! timer (the folder then only acts when externally triggered).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{FolderError, FolderResult};
use crate::author::LocalAuthor;
use crate::capability::{CapKind, Capability};
use crate::uploader::RetrySchedule;

fn default_poll_interval() -> u64 {
    60
}

fn default_scan_interval() -> u64 {
    60
}

fn default_ancestry_depth() -> u32 {
    1000
}

/// Upload retry timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First retry delay in seconds
    pub initial_seconds: u64,
    /// Delay ceiling in seconds
    pub cap_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_seconds: 1,
            cap_seconds: 3600,
        }
    }
}

/// Per-folder persistent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Folder name, unique within the process
    pub name: String,
    /// The working (magic) directory being synchronized
    pub magic_path: PathBuf,
    /// State directory holding `state.db` and `stash/`
    pub state_path: PathBuf,
    /// Author name
    pub author_name: String,
    /// Base64 Ed25519 signing key
    pub signing_key: String,
    /// Read capability of the collective directory
    pub collective: Capability,
    /// Write capability of our personal directory
    pub personal: Capability,
    /// Seconds between remote polls; zero disables the timer
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Seconds between local scans; zero disables the timer
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
    /// Upload retry schedule
    #[serde(default)]
    pub upload_retry: RetryConfig,
    /// Ancestry walk depth bound
    #[serde(default = "default_ancestry_depth")]
    pub ancestry_depth: u32,
}

impl FolderConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> FolderResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FolderError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| FolderError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> FolderResult<()> {
        self.validate()?;
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| FolderError::Config(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| FolderError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    /// Check invariants that do not require touching the filesystem.
    pub fn validate(&self) -> FolderResult<()> {
        if self.name.is_empty() {
            return Err(FolderError::Config("folder name is empty".into()));
        }
        if self.author_name.is_empty() {
            return Err(FolderError::Config("author name is empty".into()));
        }
        if self.collective.kind() != CapKind::MutableDirectoryRead {
            return Err(FolderError::Config(format!(
                "collective must be a read capability, got {}",
                self.collective.kind().name()
            )));
        }
        if self.personal.kind() != CapKind::MutableDirectoryWrite {
            return Err(FolderError::Config(format!(
                "personal must be a write capability, got {}",
                self.personal.kind().name()
            )));
        }
        if self.ancestry_depth == 0 {
            return Err(FolderError::Config("ancestry depth must be positive".into()));
        }
        if self.upload_retry.initial_seconds == 0 {
            return Err(FolderError::Config(
                "upload retry initial delay must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The author this folder signs snapshots as.
    pub fn author(&self) -> FolderResult<LocalAuthor> {
        LocalAuthor::from_base64(&self.author_name, &self.signing_key)
            .map_err(|e| FolderError::Config(e.to_string()))
    }

    /// Where the snapshot store lives.
    pub fn store_path(&self) -> PathBuf {
        self.state_path.join("state.db")
    }

    /// Where the stash lives.
    pub fn stash_path(&self) -> PathBuf {
        self.state_path.join("stash")
    }

    /// The upload retry schedule.
    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::new(
            Duration::from_secs(self.upload_retry.initial_seconds),
            Duration::from_secs(self.upload_retry.cap_seconds),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FolderConfig {
        FolderConfig {
            name: "cats".into(),
            magic_path: "/tmp/cats".into(),
            state_path: "/tmp/cats-state".into(),
            author_name: "alice".into(),
            signing_key: LocalAuthor::generate("alice").signing_key_base64(),
            collective: Capability::parse("URI:DIR2-RO:abc:def").unwrap(),
            personal: Capability::parse("URI:DIR2:ghi:jkl").unwrap(),
            poll_interval_seconds: 60,
            scan_interval_seconds: 60,
            upload_retry: RetryConfig::default(),
            ancestry_depth: 1000,
        }
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("folder.json");

        let config = sample();
        config.save(&path).unwrap();
        let loaded = FolderConfig::load(&path).unwrap();

        assert_eq!(loaded.name, "cats");
        assert_eq!(loaded.collective, config.collective);
        assert_eq!(loaded.author().unwrap().name(), "alice");
    }

    #[test]
    fn test_defaults_fill_in() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("folder.json");

        // Minimal document without timing fields
        let json = serde_json::json!({
            "name": "cats",
            "magic_path": "/tmp/cats",
            "state_path": "/tmp/cats-state",
            "author_name": "alice",
            "signing_key": LocalAuthor::generate("alice").signing_key_base64(),
            "collective": "URI:DIR2-RO:abc:def",
            "personal": "URI:DIR2:ghi:jkl",
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let config = FolderConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.scan_interval_seconds, 60);
        assert_eq!(config.ancestry_depth, 1000);
        assert_eq!(config.upload_retry, RetryConfig::default());
    }

    #[test]
    fn test_wrong_capability_kinds_rejected() {
        let mut config = sample();
        config.collective = Capability::parse("URI:DIR2:abc:def").unwrap();
        assert!(matches!(config.validate(), Err(FolderError::Config(_))));

        let mut config = sample();
        config.personal = Capability::parse("URI:DIR2-RO:abc:def").unwrap();
        assert!(matches!(config.validate(), Err(FolderError::Config(_))));
    }

    #[test]
    fn test_retry_schedule_from_config() {
        let mut config = sample();
        config.upload_retry = RetryConfig {
            initial_seconds: 2,
            cap_seconds: 10,
        };
        let schedule = config.retry_schedule();
        assert_eq!(schedule.delay(1), Duration::from_secs(2));
        assert_eq!(schedule.delay(10), Duration::from_secs(10));
    }
}
