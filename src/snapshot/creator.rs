//! Local snapshot creation
//!
//! Capturing a path follows this exact sequence:
//!
//! 1. Validate the relative path and resolve it inside the folder root,
//!    rejecting symlinks that escape
//! 2. Open the working file; an unreadable file fails the capture with the
//!    store untouched
//! 3. Stream the bytes into the stash
//! 4. Measure size and mtime from the stashed copy, not the live file
//! 5. Insert the snapshot row; on store failure the stash entry is released
//!
//! Parent wiring happens inside the store: an existing head local snapshot
//! becomes the parent, otherwise the current remote snapshot does.

use std::fs::File;
use std::path::PathBuf;

use chrono::Utc;

use super::errors::{SnapshotError, SnapshotResult};
use super::LocalSnapshot;
use crate::author::LocalAuthor;
use crate::relpath::RelativePath;
use crate::stash::Stash;
use crate::store::{PendingSnapshot, SnapshotStore};

/// Captures filesystem paths into signed local snapshots.
pub struct SnapshotCreator {
    author: LocalAuthor,
    magic_path: PathBuf,
}

impl SnapshotCreator {
    pub fn new(author: LocalAuthor, magic_path: impl Into<PathBuf>) -> Self {
        Self {
            author,
            magic_path: magic_path.into(),
        }
    }

    /// The author snapshots are attributed to.
    pub fn author(&self) -> &LocalAuthor {
        &self.author
    }

    /// Capture the current contents of `path` as a new local snapshot.
    pub fn capture(
        &self,
        store: &mut SnapshotStore,
        stash: &Stash,
        path: &RelativePath,
    ) -> SnapshotResult<LocalSnapshot> {
        let target = self.validate(path)?;

        let file = File::open(&target).map_err(|e| {
            SnapshotError::io(format!("cannot read {}", target.display()), e)
        })?;

        // Content goes into the stash before any store row exists.
        let stash_name = stash
            .stash(file)
            .map_err(|e| SnapshotError::io("failed to stash content", e))?;
        let stashed = match stash.metadata(&stash_name) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = stash.release(&stash_name);
                return Err(SnapshotError::io("failed to stat stashed content", e));
            }
        };

        let content_hash = match hash_stashed(stash, &stash_name) {
            Ok(hash) => hash,
            Err(e) => {
                let _ = stash.release(&stash_name);
                return Err(e);
            }
        };

        let pending = PendingSnapshot {
            path: path.clone(),
            author_name: self.author.name().to_string(),
            content_stash: Some(stash_name.clone()),
            size: Some(stashed.size),
            mtime: stashed.mtime,
            content_hash: Some(content_hash),
        };
        match store.store_local(pending) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let _ = stash.release(&stash_name);
                Err(SnapshotError::io("failed to persist snapshot row", e))
            }
        }
    }

    /// Capture the deletion of `path` as a new local snapshot.
    ///
    /// Only meaningful for a path the folder has history for; deleting an
    /// untracked path is a validation error.
    pub fn capture_deletion(
        &self,
        store: &mut SnapshotStore,
        path: &RelativePath,
    ) -> SnapshotResult<LocalSnapshot> {
        self.validate_name(path)?;

        let tracked = store.get_local(path).is_ok() || store.get_remote(path).is_ok();
        if !tracked {
            return Err(SnapshotError::validation(format!(
                "cannot snapshot deletion of untracked path {:?}",
                path.as_str()
            )));
        }

        let pending = PendingSnapshot {
            path: path.clone(),
            author_name: self.author.name().to_string(),
            content_stash: None,
            size: None,
            mtime: Utc::now().timestamp(),
            content_hash: None,
        };
        store
            .store_local(pending)
            .map_err(|e| SnapshotError::io("failed to persist deletion row", e))
    }

    fn validate(&self, path: &RelativePath) -> SnapshotResult<PathBuf> {
        self.validate_name(path)?;
        path.resolve_within(&self.magic_path)
            .map_err(|e| SnapshotError::validation(e.to_string()))
    }

    fn validate_name(&self, path: &RelativePath) -> SnapshotResult<()> {
        if path.is_conflict_marker() {
            return Err(SnapshotError::validation(format!(
                "conflict files are not snapshotted: {:?}",
                path.as_str()
            )));
        }
        Ok(())
    }
}

/// Hex SHA-256 of a stashed blob, streamed.
pub fn hash_stashed(stash: &Stash, name: &str) -> SnapshotResult<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = stash
        .open_blob(name)
        .map_err(|e| SnapshotError::io("failed to open stashed content", e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| SnapshotError::io("failed to read stashed content", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
