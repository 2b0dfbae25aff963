//! Remote snapshot downloader / updater
//!
//! Observes the other participants in the collective and applies their
//! published snapshots. For each `(path, their-cap)` entry of a peer's
//! personal directory the outcome is one of:
//!
//! - **up-to-date**: their cap is what we already track
//! - **update**: our version is an ancestor of theirs; fast-forward the
//!   working file and advance the remote pointer
//! - **ignore**: their cap is an ancestor of ours; we are ahead
//! - **conflict**: divergent histories; write the incoming version to a
//!   `<path>.conflict-<participant>` sibling and record it, never
//!   overwriting the working file
//!
//! A path with pending local snapshots always conflicts when a peer
//! advances, unless their cap is already in the pending chain's ancestry.
//! Ancestry walks are depth-bounded; exceeding the bound counts as a
//! conflict, so a hostile peer cannot trap the walker.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::capability::Capability;
use crate::grid::{Grid, GridError};
use crate::observability::Logger;
use crate::relpath::RelativePath;
use crate::scanner::TMP_PREFIX;
use crate::snapshot::{RemoteSnapshot, SnapshotError};
use crate::store::{RemoteEntry, RemoteObjectCaps, SnapshotStore};

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Download failures, split by retryability
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// A later poll retries
    #[error("transient download failure: {0}")]
    Transient(String),

    /// Halts the folder (signature verification failure, local corruption)
    #[error("fatal download failure: {0}")]
    Fatal(String),
}

impl DownloadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Transient(_))
    }

    fn from_grid(e: GridError) -> Self {
        // A peer's missing or malformed objects must not halt our folder;
        // permanent grid errors on their data are just entries we skip
        // until a later poll.
        DownloadError::Transient(e.to_string())
    }

    fn from_snapshot(e: SnapshotError) -> Self {
        if e.is_fatal() {
            DownloadError::Fatal(e.to_string())
        } else {
            DownloadError::Transient(e.to_string())
        }
    }
}

/// Outcome of processing one personal-directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Their cap is what we already track
    UpToDate,
    /// Fast-forwarded the working file
    Updated,
    /// We are ahead of the peer
    Ignored,
    /// Divergent histories; true if the conflict is newly recorded
    Conflicted { newly_recorded: bool },
}

enum Walk {
    Found,
    NotFound,
    DepthExceeded,
}

/// Applies peers' snapshots to one folder.
pub struct Downloader {
    grid: Arc<dyn Grid>,
    collective: Capability,
    self_name: String,
    magic_path: PathBuf,
    folder_name: String,
    ancestry_depth: u32,
}

impl Downloader {
    pub fn new(
        grid: Arc<dyn Grid>,
        collective: Capability,
        self_name: impl Into<String>,
        magic_path: impl Into<PathBuf>,
        folder_name: impl Into<String>,
        ancestry_depth: u32,
    ) -> Self {
        Self {
            grid,
            collective,
            self_name: self_name.into(),
            magic_path: magic_path.into(),
            folder_name: folder_name.into(),
            ancestry_depth,
        }
    }

    /// Refresh the participant → personal-directory map, excluding self.
    pub async fn participants(&self) -> DownloadResult<Vec<(String, Capability)>> {
        let listing = self
            .grid
            .list_directory(&self.collective)
            .await
            .map_err(DownloadError::from_grid)?;
        Ok(listing
            .into_iter()
            .filter(|(name, _)| name != &self.self_name)
            .collect())
    }

    /// List a participant's personal directory as relative paths.
    ///
    /// Entries with unparseable names are skipped with a warning; one bad
    /// entry must not hide the rest of the listing.
    pub async fn personal_entries(
        &self,
        personal: &Capability,
    ) -> DownloadResult<Vec<(RelativePath, Capability)>> {
        let listing = self
            .grid
            .list_directory(personal)
            .await
            .map_err(DownloadError::from_grid)?;

        let mut entries = Vec::new();
        for (name, cap) in listing {
            match RelativePath::demangle(&name) {
                Ok(path) => entries.push((path, cap)),
                Err(e) => {
                    Logger::warn(
                        "PERSONAL_ENTRY_SKIPPED",
                        &[
                            ("folder", self.folder_name.as_str()),
                            ("entry", name.as_str()),
                            ("reason", &e.to_string()),
                        ],
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Process one `(path, their-cap)` entry from `participant`.
    pub async fn process_entry(
        &self,
        store: &mut SnapshotStore,
        path: &RelativePath,
        participant: &str,
        their_cap: &Capability,
    ) -> DownloadResult<Outcome> {
        let ours = store.get_remote(path).ok().cloned();

        if ours.as_ref() == Some(their_cap) {
            return Ok(Outcome::UpToDate);
        }

        // A locally pending path never fast-forwards under a peer advance;
        // the only non-conflict case is their cap already being part of the
        // pending chain's ancestry.
        if let Ok(chain) = store.local_chain(path) {
            let known = chain
                .iter()
                .any(|snapshot| snapshot.remote_parents.contains(their_cap));
            if known {
                return Ok(Outcome::Ignored);
            }
            return self.conflict(store, path, participant, their_cap).await;
        }

        let ours = match ours {
            // Nothing local at all: a fresh path from the peer.
            None => return self.update(store, path, their_cap).await,
            Some(ours) => ours,
        };

        // Fast-forward if ours is an ancestor of theirs.
        match self.walk_ancestry(their_cap, &ours).await? {
            Walk::Found => return self.update(store, path, their_cap).await,
            Walk::DepthExceeded => {
                return self.conflict(store, path, participant, their_cap).await
            }
            Walk::NotFound => {}
        }

        // Ignore if theirs is an ancestor of ours.
        match self.walk_ancestry(&ours, their_cap).await? {
            Walk::Found => Ok(Outcome::Ignored),
            Walk::NotFound | Walk::DepthExceeded => {
                self.conflict(store, path, participant, their_cap).await
            }
        }
    }

    /// Breadth-first walk of `from`'s ancestry looking for `target`.
    async fn walk_ancestry(&self, from: &Capability, target: &Capability) -> DownloadResult<Walk> {
        let mut frontier = vec![from.clone()];
        let mut visited: HashSet<String> = HashSet::new();
        let mut depth = 0u32;

        while !frontier.is_empty() {
            if depth >= self.ancestry_depth {
                return Ok(Walk::DepthExceeded);
            }
            depth += 1;

            let mut next = Vec::new();
            for cap in frontier {
                if !visited.insert(cap.to_string()) {
                    continue;
                }
                let snapshot = RemoteSnapshot::fetch(self.grid.as_ref(), &cap)
                    .await
                    .map_err(DownloadError::from_snapshot)?;
                for parent in snapshot.parents {
                    if parent == *target {
                        return Ok(Walk::Found);
                    }
                    next.push(parent);
                }
            }
            frontier = next;
        }
        Ok(Walk::NotFound)
    }

    /// Fast-forward: fetch their snapshot, replace the working file
    /// atomically, then advance the remote pointer.
    async fn update(
        &self,
        store: &mut SnapshotStore,
        path: &RelativePath,
        their_cap: &Capability,
    ) -> DownloadResult<Outcome> {
        let snapshot = RemoteSnapshot::fetch(self.grid.as_ref(), their_cap)
            .await
            .map_err(DownloadError::from_snapshot)?;

        let target = path.fs_path(&self.magic_path);
        let content_hash = match &snapshot.content {
            Some(content_cap) => {
                let bytes = self
                    .grid
                    .get_immutable(content_cap)
                    .await
                    .map_err(DownloadError::from_grid)?;
                let hash = hex_sha256(&bytes);
                write_atomically(&target, &bytes, snapshot.metadata.modification_time)
                    .map_err(|e| DownloadError::Transient(e.to_string()))?;
                Some(hash)
            }
            None => {
                match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(DownloadError::Transient(e.to_string())),
                }
                None
            }
        };

        let entry = RemoteEntry {
            caps: RemoteObjectCaps {
                snapshot: snapshot.cap.clone(),
                content: snapshot.content.clone(),
                metadata: snapshot.metadata_cap.clone(),
            },
            size: snapshot.metadata.size,
            mtime: snapshot.metadata.modification_time,
            content_hash,
        };
        store
            .store_remote(path, entry)
            .map_err(|e| DownloadError::Fatal(e.to_string()))?;

        Logger::info(
            "REMOTE_UPDATE_APPLIED",
            &[
                ("folder", self.folder_name.as_str()),
                ("path", path.as_str()),
                ("snapshot", &their_cap.to_string()),
            ],
        );
        Ok(Outcome::Updated)
    }

    /// Divergence: write the incoming version to a conflict sibling and
    /// record it. The working file and the remote pointer stay untouched.
    async fn conflict(
        &self,
        store: &mut SnapshotStore,
        path: &RelativePath,
        participant: &str,
        their_cap: &Capability,
    ) -> DownloadResult<Outcome> {
        let already = store
            .conflicts_for(path)
            .iter()
            .any(|c| c.participant == participant && c.cap == *their_cap);
        if already {
            return Ok(Outcome::Conflicted {
                newly_recorded: false,
            });
        }

        // The sibling file lands before the conflict row commits, so a
        // crash in between re-surfaces the file on the next poll instead of
        // losing it.
        let snapshot = RemoteSnapshot::fetch(self.grid.as_ref(), their_cap)
            .await
            .map_err(DownloadError::from_snapshot)?;
        if let Some(content_cap) = &snapshot.content {
            let bytes = self
                .grid
                .get_immutable(content_cap)
                .await
                .map_err(DownloadError::from_grid)?;
            let sibling = path.conflict_sibling(participant);
            write_atomically(
                &sibling.fs_path(&self.magic_path),
                &bytes,
                snapshot.metadata.modification_time,
            )
            .map_err(|e| DownloadError::Transient(e.to_string()))?;
        }

        store
            .record_conflict(path, participant, their_cap)
            .map_err(|e| DownloadError::Fatal(e.to_string()))?;

        Logger::warn(
            "CONFLICT_DETECTED",
            &[
                ("folder", self.folder_name.as_str()),
                ("participant", participant),
                ("path", path.as_str()),
            ],
        );
        Ok(Outcome::Conflicted {
            newly_recorded: true,
        })
    }
}

/// Write bytes beside the target and rename into place, so readers never
/// observe a half-written file.
fn write_atomically(target: &Path, bytes: &[u8], mtime: i64) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let nonce: [u8; 8] = rand::random();
    let tmp_name: String = nonce.iter().map(|b| format!("{:02x}", b)).collect();
    let tmp = target
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}{}", TMP_PREFIX, tmp_name));

    let mut file = std::fs::File::create(&tmp)?;
    let result = file
        .write_all(bytes)
        .and_then(|_| file.sync_all())
        .and_then(|_| {
            let _ = file.set_modified(
                std::time::UNIX_EPOCH + std::time::Duration::from_secs(mtime.max(0) as u64),
            );
            Ok(())
        });
    drop(file);
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, target)
}

fn hex_sha256(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
