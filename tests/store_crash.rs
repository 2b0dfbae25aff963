//! Store Crash Safety Tests
//!
//! Tests for:
//! - Torn-tail recovery after a crash mid-commit
//! - Halt-on-corruption for fully-present damaged records
//! - Schema version enforcement
//! - Reopen consistency over every crash prefix of an operation sequence

use gridsync::capability::Capability;
use gridsync::relpath::RelativePath;
use gridsync::store::{
    PendingSnapshot, RemoteEntry, RemoteObjectCaps, SnapshotStore, StoreErrorCode,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn rel(s: &str) -> RelativePath {
    RelativePath::new(s).unwrap()
}

fn pending(path: &str, stash: &str) -> PendingSnapshot {
    PendingSnapshot {
        path: rel(path),
        author_name: "alice".into(),
        content_stash: Some(stash.into()),
        size: Some(5),
        mtime: 1_700_000_000,
        content_hash: Some("ab".repeat(32)),
    }
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

fn populate(db_path: &Path) {
    let mut store = SnapshotStore::open(db_path).unwrap();
    store.store_local(pending("sylvester", "s1")).unwrap();
    store.store_local(pending("sylvester", "s2")).unwrap();
    store.store_local(pending("tweety", "s3")).unwrap();
    store.store_remote(&rel("sylvester"), remote("a")).unwrap();
    store
        .record_conflict(&rel("tweety"), "bob", &remote("b").caps.snapshot)
        .unwrap();
}

// =============================================================================
// Torn tails are crash artifacts, not corruption
// =============================================================================

/// A record cut off mid-write is discarded and the store opens with the
/// committed prefix intact.
#[test]
fn test_torn_tail_recovers_committed_prefix() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");
    populate(&db_path);

    let committed = fs::read(&db_path).unwrap();
    let mut torn = committed.clone();
    torn.extend_from_slice(&[0x99, 0x00, 0x00, 0x01, 0x02]);
    fs::write(&db_path, &torn).unwrap();

    let store = SnapshotStore::open(&db_path).unwrap();
    assert_eq!(store.all_local_paths(), vec![rel("tweety")]);
    assert!(store.get_remote(&rel("sylvester")).is_ok());
    assert_eq!(store.conflicts().len(), 1);

    // The torn bytes are gone from disk
    assert_eq!(fs::read(&db_path).unwrap().len(), committed.len());
}

/// A crash before the very first record finishes leaves a reinitializable
/// store, not a bricked one.
#[test]
fn test_torn_first_record_reinitializes() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");

    // Simulate a crash during initialization: a 3-byte fragment
    fs::write(&db_path, [0x10, 0x00, 0x00]).unwrap();

    let mut store = SnapshotStore::open(&db_path).unwrap();
    store.store_local(pending("sylvester", "s1")).unwrap();
    drop(store);

    let store = SnapshotStore::open(&db_path).unwrap();
    assert_eq!(store.all_local_paths(), vec![rel("sylvester")]);
}

// =============================================================================
// Halt-on-corruption
// =============================================================================

/// A fully-present record with a flipped byte halts opening; no repair is
/// attempted.
#[test]
fn test_mid_file_corruption_halts() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");
    populate(&db_path);

    let mut contents = fs::read(&db_path).unwrap();
    let mid = contents.len() / 2;
    contents[mid] ^= 0xFF;
    fs::write(&db_path, &contents).unwrap();

    let err = SnapshotStore::open(&db_path).unwrap_err();
    assert!(err.is_fatal(), "corruption must halt, not skip records");
    assert_eq!(err.code(), StoreErrorCode::SyncStoreCorrupt);
}

// =============================================================================
// Schema versioning
// =============================================================================

/// An unknown schema version refuses to open with a configuration error
/// instead of silently migrating.
#[test]
fn test_unknown_schema_version_refused() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");

    // Craft a file whose only record claims schema version 99.
    // Record layout: [len u32][json][crc u32], crc over len+json.
    let payload = br#"{"op":"schema_version","version":99}"#;
    let record_length = (4 + payload.len() + 4) as u32;
    let mut record = Vec::new();
    record.extend_from_slice(&record_length.to_le_bytes());
    record.extend_from_slice(payload);
    let crc = crc32(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    fs::write(&db_path, &record).unwrap();

    let err = SnapshotStore::open(&db_path).unwrap_err();
    assert_eq!(err.code(), StoreErrorCode::SyncStoreSchema);
    assert!(err.is_fatal());
}

fn crc32(bytes: &[u8]) -> u32 {
    // Mirrors the store's framing checksum (CRC32 over length + payload)
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

// =============================================================================
// Reopen consistency over crash prefixes
// =============================================================================

/// For every byte-prefix of a committed operation sequence, opening the
/// prefix yields a consistent store: each path either still has its local
/// chain with the remote pointer unchanged, or the pointer advanced and
/// the chain is gone. Never both, never neither.
#[test]
fn test_every_crash_prefix_is_consistent() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");
    populate(&db_path);
    let full = fs::read(&db_path).unwrap();

    for cut in 0..=full.len() {
        let prefix_path = temp.path().join(format!("prefix-{}.db", cut));
        fs::write(&prefix_path, &full[..cut]).unwrap();

        let store = match SnapshotStore::open(&prefix_path) {
            Ok(store) => store,
            Err(e) => panic!("prefix {} failed to open: {}", cut, e),
        };

        // Advancing sylvester's remote pointer and dropping its chain is
        // one record: a prefix sees either the pending chain or the
        // advanced pointer, never both and never neither (once the first
        // snapshot record is in).
        let has_chain = store.get_local(&rel("sylvester")).is_ok();
        let has_remote = store.get_remote(&rel("sylvester")).is_ok();
        assert!(
            !(has_chain && has_remote),
            "prefix {}: chain and advanced pointer coexist",
            cut
        );

        // Chain invariant: tweety's chain, when visible, is complete
        if let Ok(chain) = store.local_chain(&rel("tweety")) {
            assert_eq!(chain.len(), 1);
        }
    }
}

/// Stash names reported for release stay referenced until the remote
/// advance commits, so a crash before release only leaks files that a
/// startup sweep can reclaim.
#[test]
fn test_release_list_matches_dropped_chain() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state.db");

    let mut store = SnapshotStore::open(&db_path).unwrap();
    store.store_local(pending("sylvester", "s1")).unwrap();
    store.store_local(pending("sylvester", "s2")).unwrap();
    assert_eq!(
        store.referenced_stash_names().len(),
        2,
        "both chain members reference their stash blobs"
    );

    let released = store.store_remote(&rel("sylvester"), remote("a")).unwrap();
    assert_eq!(released, vec!["s1".to_string(), "s2".to_string()]);
    assert!(store.referenced_stash_names().is_empty());
}
