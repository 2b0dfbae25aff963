//! Remote snapshot creator
//!
//! Drains pending local snapshots to the grid. For one path the whole
//! chain uploads deepest-ancestor first, so parents always exist before
//! their children reference them:
//!
//! 1. Resolve parent capabilities (ancestors uploaded earlier in the pass,
//!    plus parents already on the grid)
//! 2. Upload the stashed content as an immutable blob
//! 3. Upload the signed metadata blob
//! 4. Create the immutable snapshot directory
//! 5. Link the head snapshot into the personal directory under the mangled
//!    path name, conditional on the previously published entry
//! 6. Atomically advance the store's remote pointer, dropping the local
//!    chain, and release the stash blobs
//!
//! Steps 1–4 are idempotent: content addressing collapses a retried upload
//! onto the same capabilities. Step 5 is the only remote mutation. Failures
//! before the store commit are retried with exponential backoff; a failure
//! of the commit itself is fatal because it means local corruption.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::author::LocalAuthor;
use crate::capability::Capability;
use crate::grid::{DirectoryListing, Grid, GridError};
use crate::observability::Logger;
use crate::relpath::RelativePath;
use crate::snapshot::{parent_entry, LocalSnapshot, SnapshotMetadata, ENTRY_CONTENT, ENTRY_METADATA};
use crate::stash::Stash;
use crate::store::{RemoteEntry, RemoteObjectCaps, SnapshotStore};

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Upload failures, split by retryability
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Retried with exponential backoff
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// Disables the folder's uploader until explicitly resumed
    #[error("fatal upload failure: {0}")]
    Fatal(String),
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }

    fn from_grid(e: GridError) -> Self {
        match e {
            GridError::Transient(msg) => UploadError::Transient(msg),
            GridError::Permanent(msg) => UploadError::Fatal(msg),
        }
    }
}

/// Exponential upload retry schedule: starts at one second, doubles, and
/// caps at one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    initial: Duration,
    cap: Duration,
}

impl RetrySchedule {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }

    /// The delay before retry number `attempts` (1-based).
    pub fn delay(&self, attempts: u32) -> Duration {
        let doublings = attempts.saturating_sub(1).min(63);
        self.initial
            .checked_mul(1u32.checked_shl(doublings).unwrap_or(u32::MAX))
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3600))
    }
}

/// Uploads local snapshot chains and advances the personal directory.
pub struct RemoteSnapshotCreator {
    grid: Arc<dyn Grid>,
    author: LocalAuthor,
    personal_dir: Capability,
    folder_name: String,
}

impl RemoteSnapshotCreator {
    pub fn new(
        grid: Arc<dyn Grid>,
        author: LocalAuthor,
        personal_dir: Capability,
        folder_name: impl Into<String>,
    ) -> Self {
        Self {
            grid,
            author,
            personal_dir,
            folder_name: folder_name.into(),
        }
    }

    /// Upload the pending chain for one path and commit the result.
    ///
    /// Returns the remote entry now recorded for the path.
    pub async fn upload_chain(
        &self,
        store: &mut SnapshotStore,
        stash: &Stash,
        path: &RelativePath,
    ) -> UploadResult<RemoteEntry> {
        let chain = store
            .local_chain(path)
            .map_err(|e| UploadError::Fatal(e.to_string()))?;

        // Deepest ancestor first; every local parent is resolved by the
        // time its child uploads.
        let mut uploaded: HashMap<u64, Capability> = HashMap::new();
        let mut head_caps: Option<RemoteObjectCaps> = None;

        for snapshot in &chain {
            let caps = self.upload_one(stash, snapshot, &uploaded).await?;
            uploaded.insert(snapshot.id, caps.snapshot.clone());
            head_caps = Some(caps);
        }
        let head = chain.last().expect("chain is never empty");
        let caps = head_caps.expect("chain is never empty");

        // The link is the only remote mutation; make it conditional on the
        // entry currently published. Reading our own directory first is
        // safe because this folder's loop is the only writer.
        let mangled = path.mangle();
        let previous = self
            .grid
            .list_directory(&self.personal_dir)
            .await
            .map_err(UploadError::from_grid)?
            .remove(&mangled);
        self.grid
            .link(&self.personal_dir, &mangled, &caps.snapshot, previous.as_ref())
            .await
            .map_err(UploadError::from_grid)?;

        let entry = RemoteEntry {
            caps,
            size: head.size,
            mtime: head.mtime,
            content_hash: head.content_hash.clone(),
        };
        // A failure here means the store cannot record what the grid
        // already shows; that is local corruption, not a retry case.
        let released = store
            .store_remote(path, entry.clone())
            .map_err(|e| UploadError::Fatal(e.to_string()))?;

        for name in released {
            if let Err(e) = stash.release(&name) {
                Logger::warn(
                    "STASH_RELEASE_FAILED",
                    &[
                        ("folder", self.folder_name.as_str()),
                        ("stash", name.as_str()),
                        ("reason", &e.to_string()),
                    ],
                );
            }
        }

        Logger::info(
            "UPLOAD_COMPLETE",
            &[
                ("folder", self.folder_name.as_str()),
                ("path", path.as_str()),
                ("snapshot", &entry.caps.snapshot.to_string()),
            ],
        );
        Ok(entry)
    }

    /// Upload one snapshot's objects (steps 2–4). Idempotent.
    async fn upload_one(
        &self,
        stash: &Stash,
        snapshot: &LocalSnapshot,
        uploaded: &HashMap<u64, Capability>,
    ) -> UploadResult<RemoteObjectCaps> {
        let mut parents: Vec<Capability> = Vec::new();
        for parent_id in &snapshot.local_parents {
            let cap = uploaded.get(parent_id).ok_or_else(|| {
                UploadError::Fatal(format!(
                    "local parent {} of snapshot {} was not uploaded first",
                    parent_id, snapshot.id
                ))
            })?;
            parents.push(cap.clone());
        }
        parents.extend(snapshot.remote_parents.iter().cloned());

        let content_cap = match &snapshot.content_stash {
            Some(name) => {
                let mut bytes = Vec::new();
                let mut blob = stash
                    .open_blob(name)
                    .map_err(|e| UploadError::Transient(e.to_string()))?;
                blob.read_to_end(&mut bytes)
                    .map_err(|e| UploadError::Transient(e.to_string()))?;
                Some(
                    self.grid
                        .put_immutable(bytes)
                        .await
                        .map_err(UploadError::from_grid)?,
                )
            }
            None => None,
        };

        let metadata = SnapshotMetadata::create(
            &self.author,
            &snapshot.path,
            snapshot.mtime,
            snapshot.size,
            parents.clone(),
        );
        let metadata_cap = self
            .grid
            .put_immutable(metadata.to_bytes())
            .await
            .map_err(UploadError::from_grid)?;

        let mut entries = DirectoryListing::new();
        if let Some(cap) = &content_cap {
            entries.insert(ENTRY_CONTENT.to_string(), cap.clone());
        }
        entries.insert(ENTRY_METADATA.to_string(), metadata_cap.clone());
        for (ordinal, parent) in parents.iter().enumerate() {
            entries.insert(parent_entry(ordinal), parent.clone());
        }
        let snapshot_cap = self
            .grid
            .create_immutable_directory(entries)
            .await
            .map_err(UploadError::from_grid)?;

        Ok(RemoteObjectCaps {
            snapshot: snapshot_cap,
            content: content_cap,
            metadata: metadata_cap,
        })
    }
}
