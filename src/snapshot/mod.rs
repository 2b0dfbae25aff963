//! Snapshot model
//!
//! A *local snapshot* is an unpublished, signed record of one file version:
//! it references stashed content (or marks a deletion) and its parent
//! snapshots, which may be other unpublished local snapshots or already
//! uploaded remote snapshot capabilities. A *remote snapshot* is the
//! immutable grid form: a directory bundling the content blob, a signed
//! metadata blob, and `parent0…parentN` links to ancestor snapshot
//! directories. The capability of that directory is the snapshot's
//! identity.

mod creator;
mod errors;

pub use creator::SnapshotCreator;
pub use errors::{SnapshotError, SnapshotErrorCode, SnapshotResult};

use serde::{Deserialize, Serialize};

use crate::author::{LocalAuthor, RemoteAuthor};
use crate::capability::Capability;
use crate::grid::{DirectoryListing, Grid};
use crate::relpath::RelativePath;

/// Metadata blob schema version.
pub const METADATA_SCHEMA: u32 = 1;

/// Directory entry name for the content blob.
pub const ENTRY_CONTENT: &str = "content";
/// Directory entry name for the metadata blob.
pub const ENTRY_METADATA: &str = "metadata";

/// Directory entry name for the n-th parent link.
pub fn parent_entry(ordinal: usize) -> String {
    format!("parent{}", ordinal)
}

/// An unpublished, signed snapshot staged on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// Store-assigned identifier
    pub id: u64,
    /// Folder-relative path this snapshot is a version of
    pub path: RelativePath,
    /// Name of the author that captured it
    pub author_name: String,
    /// Stash name of the captured content; `None` marks a deletion
    pub content_stash: Option<String>,
    /// Parent snapshots not yet uploaded, by store id (oldest first)
    pub local_parents: Vec<u64>,
    /// Parent snapshots already on the grid
    pub remote_parents: Vec<Capability>,
    /// Content size in bytes (`None` for deletions)
    pub size: Option<u64>,
    /// Modification time of the stashed copy, seconds since the epoch
    pub mtime: i64,
    /// Hex SHA-256 of the content (`None` for deletions)
    pub content_hash: Option<String>,
    /// Capture time, seconds since the epoch
    pub created_at: i64,
}

impl LocalSnapshot {
    /// Whether this snapshot records a deletion.
    pub fn is_deletion(&self) -> bool {
        self.content_stash.is_none()
    }
}

/// The signed metadata blob stored beside a remote snapshot's content.
///
/// `signature` is an Ed25519 signature (base64) over the canonical
/// serialization of every other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub schema: u32,
    pub name: String,
    pub author_name: String,
    pub author_verify_key: String,
    pub signature: String,
    pub modification_time: i64,
    pub size: Option<u64>,
    pub parents: Vec<String>,
}

/// The signed fields, in canonical order. Field order here is the signing
/// contract; do not reorder.
#[derive(Serialize)]
struct SignedFields<'a> {
    schema: u32,
    name: &'a str,
    author_name: &'a str,
    author_verify_key: &'a str,
    modification_time: i64,
    size: Option<u64>,
    parents: &'a [String],
}

impl SnapshotMetadata {
    /// Build and sign metadata for a snapshot of `path`.
    pub fn create(
        author: &LocalAuthor,
        path: &RelativePath,
        modification_time: i64,
        size: Option<u64>,
        parents: Vec<Capability>,
    ) -> Self {
        let parents: Vec<String> = parents.iter().map(|c| c.to_string()).collect();
        let verify_key = author.verify_key_base64();
        let canonical = canonical_bytes(
            path.as_str(),
            author.name(),
            &verify_key,
            modification_time,
            size,
            &parents,
        );
        let signature = author.sign(&canonical);
        Self {
            schema: METADATA_SCHEMA,
            name: path.as_str().to_string(),
            author_name: author.name().to_string(),
            author_verify_key: verify_key,
            signature,
            modification_time,
            size,
            parents,
        }
    }

    /// Serialize to the blob uploaded to the grid.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("metadata serialization cannot fail")
    }

    /// Parse a fetched metadata blob, without verifying the signature.
    pub fn from_bytes(bytes: &[u8]) -> SnapshotResult<Self> {
        let parsed: Self = serde_json::from_slice(bytes)
            .map_err(|e| SnapshotError::malformed(format!("metadata blob: {}", e)))?;
        if parsed.schema != METADATA_SCHEMA {
            return Err(SnapshotError::malformed(format!(
                "unknown metadata schema {}",
                parsed.schema
            )));
        }
        Ok(parsed)
    }

    /// Verify the embedded signature against the embedded verifying key.
    pub fn verify(&self) -> SnapshotResult<()> {
        let author = RemoteAuthor::from_base64(&self.author_name, &self.author_verify_key)
            .map_err(|e| SnapshotError::signature(e.to_string()))?;
        let canonical = canonical_bytes(
            &self.name,
            &self.author_name,
            &self.author_verify_key,
            self.modification_time,
            self.size,
            &self.parents,
        );
        author
            .verify(&canonical, &self.signature)
            .map_err(|e| SnapshotError::signature(e.to_string()))
    }

    /// The parent capabilities, parsed.
    pub fn parent_caps(&self) -> SnapshotResult<Vec<Capability>> {
        self.parents
            .iter()
            .map(|s| {
                Capability::parse(s)
                    .map_err(|e| SnapshotError::malformed(format!("parent capability: {}", e)))
            })
            .collect()
    }
}

fn canonical_bytes(
    name: &str,
    author_name: &str,
    author_verify_key: &str,
    modification_time: i64,
    size: Option<u64>,
    parents: &[String],
) -> Vec<u8> {
    serde_json::to_vec(&SignedFields {
        schema: METADATA_SCHEMA,
        name,
        author_name,
        author_verify_key,
        modification_time,
        size,
        parents,
    })
    .expect("canonical serialization cannot fail")
}

/// A remote snapshot fetched from the grid and validated.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// Capability of the snapshot directory (the snapshot's identity)
    pub cap: Capability,
    /// Capability of the content blob; `None` for a deletion snapshot
    pub content: Option<Capability>,
    /// Capability of the metadata blob
    pub metadata_cap: Capability,
    /// The verified metadata
    pub metadata: SnapshotMetadata,
    /// Parent snapshot capabilities, in ordinal order
    pub parents: Vec<Capability>,
}

impl RemoteSnapshot {
    /// Fetch and validate the snapshot behind `cap`.
    ///
    /// Validation checks the directory shape, parses the metadata blob,
    /// verifies its signature, and requires the `parent*` links to agree
    /// with the signed parent list.
    pub async fn fetch(grid: &dyn Grid, cap: &Capability) -> SnapshotResult<RemoteSnapshot> {
        if !cap.is_immutable_directory() {
            return Err(SnapshotError::malformed(format!(
                "snapshot capability is not an immutable directory: {}",
                cap
            )));
        }
        let listing = grid
            .list_directory(cap)
            .await
            .map_err(|e| SnapshotError::io(format!("listing snapshot {}", cap), e))?;

        let metadata_cap = listing
            .get(ENTRY_METADATA)
            .cloned()
            .ok_or_else(|| SnapshotError::malformed("snapshot directory has no metadata entry"))?;
        let metadata_bytes = grid
            .get_immutable(&metadata_cap)
            .await
            .map_err(|e| SnapshotError::io("fetching snapshot metadata", e))?;
        let metadata = SnapshotMetadata::from_bytes(&metadata_bytes)?;
        metadata.verify()?;

        let parents = ordered_parents(&listing)?;
        let signed_parents = metadata.parent_caps()?;
        if parents != signed_parents {
            return Err(SnapshotError::malformed(
                "parent links do not match signed parent list",
            ));
        }

        let content = listing.get(ENTRY_CONTENT).cloned();
        if content.is_none() && metadata.size.is_some() {
            return Err(SnapshotError::malformed(
                "snapshot has a size but no content entry",
            ));
        }

        Ok(RemoteSnapshot {
            cap: cap.clone(),
            content,
            metadata_cap,
            metadata,
            parents,
        })
    }

    /// Whether this snapshot records a deletion.
    pub fn is_deletion(&self) -> bool {
        self.content.is_none()
    }
}

/// Collect `parent0…parentN` entries in ordinal order, rejecting gaps.
fn ordered_parents(listing: &DirectoryListing) -> SnapshotResult<Vec<Capability>> {
    let mut parents = Vec::new();
    loop {
        match listing.get(&parent_entry(parents.len())) {
            Some(cap) => parents.push(cap.clone()),
            None => break,
        }
    }
    let parent_count = listing
        .keys()
        .filter(|name| name.starts_with("parent"))
        .count();
    if parent_count != parents.len() {
        return Err(SnapshotError::malformed("gap in parent entry ordinals"));
    }
    Ok(parents)
}
