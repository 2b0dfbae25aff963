//! Per-folder snapshot store
//!
//! The durable catalog of one folder: pending local snapshots (keyed by an
//! integer id, with parent edges by id or capability), the latest known
//! remote snapshot per path, and observed conflicts. Backed by a single
//! append-only file of framed records; every operation is one committed,
//! fsynced record, so a crash between operations never leaves a partial
//! transaction.
//!
//! The first record is the schema version. Opening a store written by an
//! unknown schema fails with a configuration error instead of migrating.

mod errors;
mod record;

pub use errors::{StoreError, StoreErrorCode, StoreResult};
pub use record::{ConflictRow, RemoteEntry, RemoteObjectCaps, StoreEntry};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use record::{decode_record, encode_record, Decoded};

use crate::capability::Capability;
use crate::relpath::RelativePath;
use crate::snapshot::LocalSnapshot;

/// Store schema version written to new files.
pub const SCHEMA_VERSION: u32 = 1;

/// Inputs for a new local snapshot; the store assigns the id and wires up
/// the parent edges.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub path: RelativePath,
    pub author_name: String,
    /// Stash name of the captured bytes; `None` marks a deletion
    pub content_stash: Option<String>,
    pub size: Option<u64>,
    pub mtime: i64,
    /// Hex SHA-256 of the captured bytes (`None` for a deletion)
    pub content_hash: Option<String>,
}

/// The snapshot store for one folder.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    file: File,
    committed_len: u64,
    next_id: u64,
    locals: HashMap<u64, LocalSnapshot>,
    heads: BTreeMap<RelativePath, u64>,
    remotes: BTreeMap<RelativePath, RemoteEntry>,
    conflicts: Vec<ConflictRow>,
}

impl SnapshotStore {
    /// Open (creating if necessary) the store at `path` and replay it.
    ///
    /// A torn final record is discarded as a crash artifact. A
    /// fully-present record with a bad checksum is fatal corruption.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let existing = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(StoreError::io(
                    format!("failed to read store {}", path.display()),
                    e,
                ))
            }
        };
        let is_new = existing.is_empty();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(format!("failed to open store {}", path.display()), e))?;

        let mut store = Self {
            path,
            file,
            committed_len: 0,
            next_id: 1,
            locals: HashMap::new(),
            heads: BTreeMap::new(),
            remotes: BTreeMap::new(),
            conflicts: Vec::new(),
        };

        if !is_new {
            store.replay(&existing)?;
        }
        if store.committed_len == 0 {
            // Brand new store, or a crash tore the very first record.
            store.commit(&StoreEntry::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
            store.fsync_parent_dir()?;
        }
        Ok(store)
    }

    /// The on-disk location of this store.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Insert a new head local snapshot for its path.
    ///
    /// An existing head becomes the new snapshot's local parent; otherwise
    /// the current remote snapshot, if any, becomes a remote parent.
    /// Recorded conflicts for the path become additional remote parents and
    /// are cleared: an edit made after a conflict was surfaced is the
    /// resolution, and its ancestry must include both sides.
    pub fn store_local(&mut self, pending: PendingSnapshot) -> StoreResult<LocalSnapshot> {
        let mut local_parents = Vec::new();
        let mut remote_parents = Vec::new();

        if let Some(&head_id) = self.heads.get(&pending.path) {
            local_parents.push(head_id);
        } else if let Some(remote) = self.remotes.get(&pending.path) {
            remote_parents.push(remote.caps.snapshot.clone());
        }
        for conflict in self.conflicts.iter().filter(|c| c.path == pending.path) {
            if !remote_parents.contains(&conflict.cap) {
                remote_parents.push(conflict.cap.clone());
            }
        }

        let snapshot = LocalSnapshot {
            id: self.next_id,
            path: pending.path,
            author_name: pending.author_name,
            content_stash: pending.content_stash,
            local_parents,
            remote_parents,
            size: pending.size,
            mtime: pending.mtime,
            content_hash: pending.content_hash,
            created_at: Utc::now().timestamp(),
        };

        let entry = StoreEntry::LocalSnapshot {
            snapshot: snapshot.clone(),
        };
        self.commit(&entry)?;
        self.apply(entry);
        Ok(snapshot)
    }

    /// The head local snapshot for a path.
    pub fn get_local(&self, path: &RelativePath) -> StoreResult<&LocalSnapshot> {
        self.heads
            .get(path)
            .and_then(|id| self.locals.get(id))
            .ok_or_else(|| StoreError::not_found(format!("no local snapshot for {:?}", path.as_str())))
    }

    /// The pending chain for a path, deepest ancestor first, head last.
    pub fn local_chain(&self, path: &RelativePath) -> StoreResult<Vec<LocalSnapshot>> {
        let head = self.get_local(path)?;
        let mut chain = Vec::new();
        self.collect_chain(head, &mut chain);
        Ok(chain)
    }

    fn collect_chain(&self, snapshot: &LocalSnapshot, out: &mut Vec<LocalSnapshot>) {
        for parent_id in &snapshot.local_parents {
            if let Some(parent) = self.locals.get(parent_id) {
                self.collect_chain(parent, out);
            }
        }
        out.push(snapshot.clone());
    }

    /// Paths that have pending local snapshots.
    pub fn all_local_paths(&self) -> Vec<RelativePath> {
        self.heads.keys().cloned().collect()
    }

    /// Atomically advance the remote pointer for a path and drop the local
    /// chain whose head has that path.
    ///
    /// Returns the stash names no longer referenced so the caller can
    /// release them; the record is durable before any file is unlinked.
    pub fn store_remote(
        &mut self,
        path: &RelativePath,
        remote: RemoteEntry,
    ) -> StoreResult<Vec<String>> {
        let released = match self.get_local(path) {
            Ok(_) => self
                .local_chain(path)?
                .iter()
                .filter_map(|s| s.content_stash.clone())
                .collect(),
            Err(_) => Vec::new(),
        };

        let entry = StoreEntry::RemoteAdvance {
            path: path.clone(),
            entry: remote,
        };
        self.commit(&entry)?;
        self.apply(entry);
        Ok(released)
    }

    /// The latest known remote snapshot capability for a path.
    pub fn get_remote(&self, path: &RelativePath) -> StoreResult<&Capability> {
        self.remote_entry(path).map(|entry| &entry.caps.snapshot)
    }

    /// Everything recorded about the latest remote snapshot for a path.
    pub fn remote_entry(&self, path: &RelativePath) -> StoreResult<&RemoteEntry> {
        self.remotes
            .get(path)
            .ok_or_else(|| StoreError::not_found(format!("no remote snapshot for {:?}", path.as_str())))
    }

    /// The remote object capability triple (snapshot dir, content blob,
    /// metadata blob) for diagnostics.
    pub fn remote_object_caps(&self, path: &RelativePath) -> StoreResult<&RemoteObjectCaps> {
        self.remote_entry(path).map(|entry| &entry.caps)
    }

    /// Paths with a known remote snapshot.
    pub fn remote_paths(&self) -> Vec<RelativePath> {
        self.remotes.keys().cloned().collect()
    }

    /// Record an observed conflict. Returns false if the identical conflict
    /// is already recorded.
    pub fn record_conflict(
        &mut self,
        path: &RelativePath,
        participant: &str,
        cap: &Capability,
    ) -> StoreResult<bool> {
        let already = self
            .conflicts
            .iter()
            .any(|c| c.path == *path && c.participant == participant && c.cap == *cap);
        if already {
            return Ok(false);
        }

        let entry = StoreEntry::Conflict {
            conflict: ConflictRow {
                path: path.clone(),
                participant: participant.to_string(),
                cap: cap.clone(),
                detected_at: Utc::now().timestamp(),
            },
        };
        self.commit(&entry)?;
        self.apply(entry);
        Ok(true)
    }

    /// All recorded conflicts.
    pub fn conflicts(&self) -> &[ConflictRow] {
        &self.conflicts
    }

    /// Recorded conflicts for one path.
    pub fn conflicts_for(&self, path: &RelativePath) -> Vec<&ConflictRow> {
        self.conflicts.iter().filter(|c| c.path == *path).collect()
    }

    /// Stash names referenced by any pending local snapshot. Files in the
    /// stash directory outside this set are garbage from an interrupted
    /// release and can be swept.
    pub fn referenced_stash_names(&self) -> HashSet<String> {
        self.locals
            .values()
            .filter_map(|s| s.content_stash.clone())
            .collect()
    }

    /// Append one committed record. On a failed write the file is
    /// truncated back to the last committed length so the tail stays
    /// parseable.
    fn commit(&mut self, entry: &StoreEntry) -> StoreResult<()> {
        let bytes = encode_record(entry);
        if let Err(write_err) = self
            .file
            .write_all(&bytes)
            .and_then(|_| self.file.sync_all())
        {
            if self.file.set_len(self.committed_len).is_err() {
                return Err(StoreError::corrupt(format!(
                    "write failed and truncation failed; store {} needs repair",
                    self.path.display()
                )));
            }
            return Err(StoreError::io("store commit failed", write_err));
        }
        self.committed_len += bytes.len() as u64;
        Ok(())
    }

    /// Apply a committed entry to the in-memory state. Shared by live
    /// commits and replay so both walk the same transitions.
    fn apply(&mut self, entry: StoreEntry) {
        match entry {
            StoreEntry::SchemaVersion { .. } => {}
            StoreEntry::LocalSnapshot { snapshot } => {
                self.next_id = self.next_id.max(snapshot.id + 1);
                self.heads.insert(snapshot.path.clone(), snapshot.id);
                self.conflicts.retain(|c| c.path != snapshot.path);
                self.locals.insert(snapshot.id, snapshot);
            }
            StoreEntry::RemoteAdvance { path, entry } => {
                if let Some(head_id) = self.heads.remove(&path) {
                    self.remove_chain(head_id);
                }
                self.remotes.insert(path, entry);
            }
            StoreEntry::Conflict { conflict } => {
                self.conflicts
                    .retain(|c| !(c.path == conflict.path && c.participant == conflict.participant));
                self.conflicts.push(conflict);
            }
        }
    }

    fn remove_chain(&mut self, id: u64) {
        if let Some(snapshot) = self.locals.remove(&id) {
            for parent_id in snapshot.local_parents {
                self.remove_chain(parent_id);
            }
        }
    }

    fn replay(&mut self, data: &[u8]) -> StoreResult<()> {
        let mut offset = 0usize;
        let mut saw_schema = false;

        loop {
            match decode_record(data, offset)? {
                Decoded::Eof => break,
                Decoded::TornTail => {
                    // Crash artifact: drop the unfinished record.
                    self.file.set_len(offset as u64).map_err(|e| {
                        StoreError::io("failed to truncate torn store tail", e)
                    })?;
                    break;
                }
                Decoded::Entry(entry, consumed) => {
                    if !saw_schema {
                        match entry {
                            StoreEntry::SchemaVersion { version } if version == SCHEMA_VERSION => {
                                saw_schema = true;
                            }
                            StoreEntry::SchemaVersion { version } => {
                                return Err(StoreError::schema(format!(
                                    "store schema version {} is not supported (expected {})",
                                    version, SCHEMA_VERSION
                                )));
                            }
                            _ => {
                                return Err(StoreError::schema(
                                    "store does not begin with a schema version record",
                                ));
                            }
                        }
                    } else {
                        self.apply(entry);
                    }
                    offset += consumed;
                }
            }
        }

        if !saw_schema && offset > 0 {
            return Err(StoreError::schema(
                "store does not begin with a schema version record",
            ));
        }
        self.committed_len = offset as u64;
        Ok(())
    }

    fn fsync_parent_dir(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)
                .map_err(|e| StoreError::io(format!("failed to open {}", parent.display()), e))?;
            dir.sync_all()
                .map_err(|e| StoreError::io(format!("fsync failed for {}", parent.display()), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    fn remote(tag: &str) -> RemoteEntry {
        RemoteEntry {
            caps: RemoteObjectCaps {
                snapshot: Capability::parse(&format!("URI:DIR2-CHK:snap-{}", tag)).unwrap(),
                content: Some(Capability::parse(&format!("URI:CHK:content-{}", tag)).unwrap()),
                metadata: Capability::parse(&format!("URI:CHK:meta-{}", tag)).unwrap(),
            },
            size: Some(5),
            mtime: 1_700_000_000,
            content_hash: Some("ab".repeat(32)),
        }
    }

    fn pending(p: &str, stash: &str) -> PendingSnapshot {
        PendingSnapshot {
            path: path(p),
            author_name: "alice".into(),
            content_stash: Some(stash.into()),
            size: Some(5),
            mtime: 1_700_000_000,
            content_hash: Some("cd".repeat(32)),
        }
    }

    fn open_store(dir: &TempDir) -> SnapshotStore {
        SnapshotStore::open(dir.path().join("state.db")).unwrap()
    }

    #[test]
    fn test_new_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.all_local_paths().is_empty());
        assert!(store.get_local(&path("x")).unwrap_err().is_not_found());
        assert!(store.get_remote(&path("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_store_local_assigns_ids_and_chains() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let first = store.store_local(pending("sylvester", "s1")).unwrap();
        let second = store.store_local(pending("sylvester", "s2")).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(second.local_parents, vec![1]);

        let chain = store.local_chain(&path("sylvester")).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, 1, "deepest ancestor first");
        assert_eq!(chain[1].id, 2);
    }

    #[test]
    fn test_first_snapshot_parents_on_remote() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let entry = remote("a");
        store.store_remote(&path("sylvester"), entry.clone()).unwrap();

        let snapshot = store.store_local(pending("sylvester", "s1")).unwrap();
        assert!(snapshot.local_parents.is_empty());
        assert_eq!(snapshot.remote_parents, vec![entry.caps.snapshot]);
    }

    #[test]
    fn test_store_remote_drops_chain_and_reports_stashes() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.store_local(pending("sylvester", "s1")).unwrap();
        store.store_local(pending("sylvester", "s2")).unwrap();

        let released = store.store_remote(&path("sylvester"), remote("a")).unwrap();
        assert_eq!(released, vec!["s1".to_string(), "s2".to_string()]);

        assert!(store.get_local(&path("sylvester")).unwrap_err().is_not_found());
        assert!(store.all_local_paths().is_empty());
        assert_eq!(
            store.get_remote(&path("sylvester")).unwrap(),
            &remote("a").caps.snapshot
        );
        assert!(store.referenced_stash_names().is_empty());
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.store_local(pending("one", "s1")).unwrap();
            store.store_remote(&path("two"), remote("b")).unwrap();
            store
                .record_conflict(&path("three"), "bob", &remote("c").caps.snapshot)
                .unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.all_local_paths(), vec![path("one")]);
        assert_eq!(store.get_remote(&path("two")).unwrap(), &remote("b").caps.snapshot);
        assert_eq!(store.conflicts().len(), 1);

        // Ids continue after the replayed maximum
        let mut store = store;
        let next = store.store_local(pending("four", "s4")).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_conflict_dedupe_and_resolution() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let their_cap = remote("theirs").caps.snapshot;
        assert!(store
            .record_conflict(&path("sylvester"), "bob", &their_cap)
            .unwrap());
        assert!(!store
            .record_conflict(&path("sylvester"), "bob", &their_cap)
            .unwrap());
        assert_eq!(store.conflicts().len(), 1);

        // The next local snapshot of the path resolves the conflict and
        // carries the divergent cap as a remote parent.
        let snapshot = store.store_local(pending("sylvester", "s1")).unwrap();
        assert!(snapshot.remote_parents.contains(&their_cap));
        assert!(store.conflicts().is_empty());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");
        {
            let mut store = SnapshotStore::open(&db_path).unwrap();
            store.store_local(pending("one", "s1")).unwrap();
        }

        // Simulate a crash mid-append
        let mut contents = std::fs::read(&db_path).unwrap();
        let good_len = contents.len();
        contents.extend_from_slice(&[42, 0, 0]);
        std::fs::write(&db_path, &contents).unwrap();

        let store = SnapshotStore::open(&db_path).unwrap();
        assert_eq!(store.all_local_paths(), vec![path("one")]);
        assert_eq!(std::fs::metadata(&db_path).unwrap().len(), good_len as u64);
    }

    #[test]
    fn test_mid_file_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");
        {
            let mut store = SnapshotStore::open(&db_path).unwrap();
            store.store_local(pending("one", "s1")).unwrap();
            store.store_local(pending("two", "s2")).unwrap();
        }

        let mut contents = std::fs::read(&db_path).unwrap();
        let mid = contents.len() / 2;
        contents[mid] ^= 0xFF;
        std::fs::write(&db_path, &contents).unwrap();

        let err = SnapshotStore::open(&db_path).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_schema_version_refused() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("state.db");

        let record = encode_record(&StoreEntry::SchemaVersion { version: 99 });
        std::fs::write(&db_path, record).unwrap();

        let err = SnapshotStore::open(&db_path).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::SyncStoreSchema);
    }
}
