//! Periodic folder scanner
//!
//! Walks the working tree and reports, against the store's view, which
//! paths changed (new files, edited files, reappeared files) and which
//! tracked paths were deleted. Change detection is by size and modification
//! time; when the size matches but the mtime moved, the working file is
//! hashed to rule out a touch-without-edit.
//!
//! The scanner never mutates anything. Errors on individual files are
//! logged and skipped; a scan never fails the folder.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::observability::Logger;
use crate::relpath::RelativePath;
use crate::store::SnapshotStore;

/// Prefix of the engine's atomic-write temp files, ignored by the scanner.
pub const TMP_PREFIX: &str = ".gridsync-tmp-";

/// What one scan pass found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Paths whose on-disk content differs from the head snapshot
    pub changed: Vec<RelativePath>,
    /// Tracked paths that no longer exist on disk
    pub deleted: Vec<RelativePath>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// The last-synchronized view of a path, from either the head local
/// snapshot or the remote entry.
struct KnownState {
    size: Option<u64>,
    mtime: i64,
    content_hash: Option<String>,
}

/// Scans one folder's working tree.
pub struct Scanner {
    folder_name: String,
    magic_path: PathBuf,
}

impl Scanner {
    pub fn new(folder_name: impl Into<String>, magic_path: impl Into<PathBuf>) -> Self {
        Self {
            folder_name: folder_name.into(),
            magic_path: magic_path.into(),
        }
    }

    /// One scan pass.
    pub fn scan(&self, store: &SnapshotStore) -> ScanReport {
        let mut report = ScanReport::default();
        self.find_changed(store, &mut report);
        self.find_deleted(store, &mut report);
        report
    }

    fn find_changed(&self, store: &SnapshotStore, report: &mut ScanReport) {
        for entry in WalkDir::new(&self.magic_path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.skip("walk error", &e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = match self.relative(entry.path()) {
                Some(path) => path,
                None => continue,
            };
            if path.is_conflict_marker() || is_tmp_file(&path) {
                continue;
            }

            let known = match self.known_state(store, &path) {
                Some(known) => known,
                None => {
                    report.changed.push(path);
                    continue;
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    self.skip(path.as_str(), &e.to_string());
                    continue;
                }
            };

            match known.size {
                // The known state is a deletion: the file reappeared.
                None => report.changed.push(path),
                Some(size) if size != metadata.len() => report.changed.push(path),
                Some(_) => {
                    let mtime = mtime_of(&metadata);
                    if mtime == known.mtime {
                        continue;
                    }
                    // Same size, different mtime: hash to break the tie.
                    match hash_file(entry.path()) {
                        Ok(hash) if Some(hash.clone()) == known.content_hash => {}
                        Ok(_) => report.changed.push(path),
                        Err(e) => self.skip(path.as_str(), &e.to_string()),
                    }
                }
            }
        }
    }

    fn find_deleted(&self, store: &SnapshotStore, report: &mut ScanReport) {
        let mut tracked = store.all_local_paths();
        for path in store.remote_paths() {
            if !tracked.contains(&path) {
                tracked.push(path);
            }
        }

        for path in tracked {
            let already_deleted = match store.get_local(&path) {
                Ok(head) => head.is_deletion(),
                Err(_) => store
                    .remote_entry(&path)
                    .map(|entry| entry.size.is_none())
                    .unwrap_or(false),
            };
            if already_deleted {
                continue;
            }
            if !path.fs_path(&self.magic_path).exists() {
                report.deleted.push(path);
            }
        }
    }

    fn known_state(&self, store: &SnapshotStore, path: &RelativePath) -> Option<KnownState> {
        if let Ok(head) = store.get_local(path) {
            return Some(KnownState {
                size: head.size,
                mtime: head.mtime,
                content_hash: head.content_hash.clone(),
            });
        }
        store.remote_entry(path).ok().map(|entry| KnownState {
            size: entry.size,
            mtime: entry.mtime,
            content_hash: entry.content_hash.clone(),
        })
    }

    fn relative(&self, fs_path: &Path) -> Option<RelativePath> {
        let stripped = fs_path.strip_prefix(&self.magic_path).ok()?;
        let mut parts = Vec::new();
        for component in stripped.components() {
            match component.as_os_str().to_str() {
                Some(s) => parts.push(s),
                None => {
                    self.skip(&fs_path.display().to_string(), "non-UTF-8 name");
                    return None;
                }
            }
        }
        match RelativePath::new(parts.join("/")) {
            Ok(path) => Some(path),
            Err(e) => {
                self.skip(&fs_path.display().to_string(), &e.to_string());
                None
            }
        }
    }

    fn skip(&self, path: &str, reason: &str) {
        Logger::warn(
            "SCAN_FILE_SKIPPED",
            &[
                ("folder", self.folder_name.as_str()),
                ("path", path),
                ("reason", reason),
            ],
        );
    }
}

fn is_tmp_file(path: &RelativePath) -> bool {
    path.as_str()
        .rsplit('/')
        .next()
        .map(|name| name.starts_with(TMP_PREFIX))
        .unwrap_or(false)
}

fn mtime_of(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Hex SHA-256 of a working file, streamed.
fn hash_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
