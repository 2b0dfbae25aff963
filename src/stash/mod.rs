//! Content stash
//!
//! Local snapshots do not reference live working files; the bytes are staged
//! into the stash first, so later edits of the working file cannot
//! invalidate a pending snapshot. Each stashed blob gets a 128-bit random
//! hex name chosen at creation. A stash name is referenced by exactly one
//! live local snapshot; release is idempotent and deletes the file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Result type for stash operations
pub type StashResult<T> = Result<T, StashError>;

/// Stash error with I/O context
///
/// All stash failures are I/O shaped; the single code keeps log grepping
/// simple.
#[derive(Debug)]
pub struct StashError {
    message: String,
    source: Option<io::Error>,
}

impl StashError {
    fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ERROR] SYNC_STASH_IO: {}", self.message)
    }
}

impl std::error::Error for StashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Metadata of a stashed blob, measured from the stashed copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StashedMetadata {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
}

/// A folder's stash directory.
#[derive(Debug, Clone)]
pub struct Stash {
    dir: PathBuf,
}

impl Stash {
    /// Open (creating if necessary) the stash directory.
    pub fn open(dir: impl Into<PathBuf>) -> StashResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StashError::io(format!("failed to create stash dir: {}", dir.display()), e)
        })?;
        Ok(Self { dir })
    }

    /// The stash directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The on-disk path of a stashed blob.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Stream `reader` into a new stash file and return its name.
    ///
    /// The file is fsynced before the name is returned, and the directory
    /// entry is fsynced as well, so a stash name handed to the store is
    /// durable.
    pub fn stash<R: Read>(&self, mut reader: R) -> StashResult<String> {
        let (name, mut file) = self.create_new()?;
        let path = self.path_of(&name);

        let result = io::copy(&mut reader, &mut file)
            .map_err(|e| StashError::io(format!("failed to write stash file {}", name), e))
            .and_then(|_| {
                file.sync_all()
                    .map_err(|e| StashError::io(format!("fsync failed for stash file {}", name), e))
            })
            .and_then(|_| self.fsync_dir());

        if let Err(e) = result {
            // Unreadable producer or failed write: leave nothing behind.
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        Ok(name)
    }

    /// Open a stashed blob for reading.
    pub fn open_blob(&self, name: &str) -> StashResult<File> {
        File::open(self.path_of(name))
            .map_err(|e| StashError::io(format!("failed to open stash file {}", name), e))
    }

    /// Size and modification time of a stashed blob.
    pub fn metadata(&self, name: &str) -> StashResult<StashedMetadata> {
        let meta = std::fs::metadata(self.path_of(name))
            .map_err(|e| StashError::io(format!("failed to stat stash file {}", name), e))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(StashedMetadata {
            size: meta.len(),
            mtime,
        })
    }

    /// Delete a stashed blob. Idempotent: releasing a name twice is fine.
    pub fn release(&self, name: &str) -> StashResult<()> {
        match std::fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StashError::io(
                format!("failed to release stash file {}", name),
                e,
            )),
        }
    }

    /// Create a fresh stash file under a random, collision-free name.
    fn create_new(&self) -> StashResult<(String, File)> {
        loop {
            let bytes: [u8; 16] = rand::random();
            let name: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path_of(&name))
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StashError::io(
                        format!("failed to create stash file {}", name),
                        e,
                    ))
                }
            }
        }
    }

    /// fsync the stash directory so new entries survive a crash.
    fn fsync_dir(&self) -> StashResult<()> {
        let dir = File::open(&self.dir)
            .map_err(|e| StashError::io(format!("failed to open {}", self.dir.display()), e))?;
        dir.sync_all()
            .map_err(|e| StashError::io(format!("fsync failed for {}", self.dir.display()), e))
    }
}
