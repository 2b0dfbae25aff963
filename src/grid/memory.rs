//! In-memory grid
//!
//! A process-local grid implementation honouring the full [`Grid`] contract:
//! content-addressed immutable objects, mutable directories with derived
//! read capabilities, and conditional links. Clones share storage, so two
//! folder engines handed clones of one `MemoryGrid` observe each other the
//! way two participants observe a real grid.
//!
//! Tests can inject transient failures with [`MemoryGrid::fail_next`] to
//! exercise retry paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};

use super::errors::{GridError, GridResult};
use super::{DirectoryListing, Grid};
use crate::capability::{CapKind, Capability};

#[derive(Default)]
struct State {
    /// Immutable blobs, keyed by capability string
    blobs: HashMap<String, Vec<u8>>,
    /// Immutable directories: capability string → (listing, canonical bytes)
    immutable_dirs: HashMap<String, (DirectoryListing, Vec<u8>)>,
    /// Mutable directories, keyed by their read-capability string
    mutable_dirs: HashMap<String, DirectoryListing>,
    /// Operations to let through before injected failures start
    fault_delay: u32,
    /// Pending injected failures, consumed one per operation
    injected_faults: u32,
}

/// Shared in-memory grid. Cloning shares the underlying storage.
#[derive(Clone, Default)]
pub struct MemoryGrid {
    state: Arc<Mutex<State>>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` grid operations fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.fault_delay = 0;
        state.injected_faults = n;
    }

    /// Let `skip` operations through, then fail the following `n` with a
    /// transient error. Lets tests break a specific step of a multi-call
    /// sequence, e.g. only the final link of an upload.
    pub fn fail_after(&self, skip: u32, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.fault_delay = skip;
        state.injected_faults = n;
    }

    fn take_fault(state: &mut State) -> GridResult<()> {
        if state.injected_faults > 0 {
            if state.fault_delay > 0 {
                state.fault_delay -= 1;
                return Ok(());
            }
            state.injected_faults -= 1;
            return Err(GridError::Transient("injected fault".into()));
        }
        Ok(())
    }

    fn hex_digest(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Canonical bytes of a listing: JSON over a sorted name → cap-string
    /// map. Deterministic, so identical listings hash to identical caps.
    fn canonical_listing(entries: &DirectoryListing) -> Vec<u8> {
        let as_strings: BTreeMap<&str, String> = entries
            .iter()
            .map(|(name, cap)| (name.as_str(), cap.to_string()))
            .collect();
        serde_json::to_vec(&as_strings).expect("listing serialization cannot fail")
    }

    /// Resolve the read-capability key for a mutable directory argument.
    fn mutable_key(cap: &Capability) -> GridResult<String> {
        match cap.kind() {
            CapKind::MutableDirectoryRead => Ok(cap.to_string()),
            CapKind::MutableDirectoryWrite => Ok(cap
                .to_read()
                .expect("write caps downgrade to read")
                .to_string()),
            other => Err(GridError::Permanent(format!(
                "not a mutable directory capability: {}",
                other.name()
            ))),
        }
    }
}

impl Grid for MemoryGrid {
    fn put_immutable<'a>(&'a self, data: Vec<u8>) -> BoxFuture<'a, GridResult<Capability>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            let cap = Capability::from_body(CapKind::ImmutableFile, Self::hex_digest(&data));
            state.blobs.insert(cap.to_string(), data);
            Ok(cap)
        })
    }

    fn create_immutable_directory<'a>(
        &'a self,
        entries: DirectoryListing,
    ) -> BoxFuture<'a, GridResult<Capability>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            let canonical = Self::canonical_listing(&entries);
            let cap =
                Capability::from_body(CapKind::ImmutableDirectory, Self::hex_digest(&canonical));
            state
                .immutable_dirs
                .insert(cap.to_string(), (entries, canonical));
            Ok(cap)
        })
    }

    fn create_mutable_directory<'a>(
        &'a self,
    ) -> BoxFuture<'a, GridResult<(Capability, Capability)>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            let secret: [u8; 16] = rand::random();
            let body: String = secret.iter().map(|b| format!("{:02x}", b)).collect();
            let write = Capability::from_body(CapKind::MutableDirectoryWrite, body);
            let read = write.to_read().expect("write caps downgrade to read");

            state
                .mutable_dirs
                .insert(read.to_string(), DirectoryListing::new());
            Ok((write, read))
        })
    }

    fn list_directory<'a>(
        &'a self,
        cap: &'a Capability,
    ) -> BoxFuture<'a, GridResult<DirectoryListing>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            match cap.kind() {
                CapKind::ImmutableDirectory => state
                    .immutable_dirs
                    .get(&cap.to_string())
                    .map(|(listing, _)| listing.clone())
                    .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", cap))),
                CapKind::MutableDirectoryRead | CapKind::MutableDirectoryWrite => {
                    let key = Self::mutable_key(cap)?;
                    state
                        .mutable_dirs
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", cap)))
                }
                other => Err(GridError::Permanent(format!(
                    "not a directory capability: {}",
                    other.name()
                ))),
            }
        })
    }

    fn link<'a>(
        &'a self,
        write_cap: &'a Capability,
        name: &'a str,
        target: &'a Capability,
        replacing: Option<&'a Capability>,
    ) -> BoxFuture<'a, GridResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            write_cap
                .require_kind(CapKind::MutableDirectoryWrite)
                .map_err(|e| GridError::Permanent(e.to_string()))?;
            let key = Self::mutable_key(write_cap)?;
            let listing = state
                .mutable_dirs
                .get_mut(&key)
                .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", write_cap)))?;

            let current = listing.get(name);
            // Relinking the value already present is a no-op; this makes a
            // crashed-then-retried upload converge instead of tripping the
            // conditional check.
            if current == Some(target) {
                return Ok(());
            }
            match (current, replacing) {
                (Some(old), Some(expected)) if old == expected => {}
                (None, None) => {}
                _ => {
                    return Err(GridError::Permanent(format!(
                        "conditional link failed for entry {:?}",
                        name
                    )))
                }
            }
            listing.insert(name.to_string(), target.clone());
            Ok(())
        })
    }

    fn unlink<'a>(
        &'a self,
        write_cap: &'a Capability,
        name: &'a str,
    ) -> BoxFuture<'a, GridResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            write_cap
                .require_kind(CapKind::MutableDirectoryWrite)
                .map_err(|e| GridError::Permanent(e.to_string()))?;
            let key = Self::mutable_key(write_cap)?;
            let listing = state
                .mutable_dirs
                .get_mut(&key)
                .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", write_cap)))?;

            listing
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| GridError::Permanent(format!("no such entry: {:?}", name)))
        })
    }

    fn get_immutable<'a>(&'a self, cap: &'a Capability) -> BoxFuture<'a, GridResult<Vec<u8>>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            state
                .blobs
                .get(&cap.to_string())
                .cloned()
                .ok_or_else(|| GridError::Permanent(format!("no such blob: {}", cap)))
        })
    }

    fn object_sizes<'a>(&'a self, cap: &'a Capability) -> BoxFuture<'a, GridResult<u64>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            Self::take_fault(&mut state)?;

            match cap.kind() {
                CapKind::ImmutableFile => state
                    .blobs
                    .get(&cap.to_string())
                    .map(|data| data.len() as u64)
                    .ok_or_else(|| GridError::Permanent(format!("no such blob: {}", cap))),
                CapKind::ImmutableDirectory => state
                    .immutable_dirs
                    .get(&cap.to_string())
                    .map(|(_, canonical)| canonical.len() as u64)
                    .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", cap))),
                CapKind::MutableDirectoryRead | CapKind::MutableDirectoryWrite => {
                    let key = Self::mutable_key(cap)?;
                    state
                        .mutable_dirs
                        .get(&key)
                        .map(|listing| Self::canonical_listing(listing).len() as u64)
                        .ok_or_else(|| GridError::Permanent(format!("no such directory: {}", cap)))
                }
                CapKind::Verify => Err(GridError::Permanent(
                    "verify capabilities carry no size".into(),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_immutable_is_content_addressed() {
        let grid = MemoryGrid::new();
        let a = grid.put_immutable(b"hello".to_vec()).await.unwrap();
        let b = grid.put_immutable(b"hello".to_vec()).await.unwrap();
        let c = grid.put_immutable(b"other".to_vec()).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(grid.get_immutable(&a).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_immutable_directory_is_content_addressed() {
        let grid = MemoryGrid::new();
        let blob = grid.put_immutable(b"x".to_vec()).await.unwrap();

        let mut entries = DirectoryListing::new();
        entries.insert("content".into(), blob.clone());

        let a = grid
            .create_immutable_directory(entries.clone())
            .await
            .unwrap();
        let b = grid.create_immutable_directory(entries).await.unwrap();
        assert_eq!(a, b);
        assert!(a.is_immutable_directory());

        let listing = grid.list_directory(&a).await.unwrap();
        assert_eq!(listing.get("content"), Some(&blob));
    }

    #[tokio::test]
    async fn test_mutable_directory_link_and_list() {
        let grid = MemoryGrid::new();
        let (write, read) = grid.create_mutable_directory().await.unwrap();
        let blob = grid.put_immutable(b"x".to_vec()).await.unwrap();

        grid.link(&write, "entry", &blob, None).await.unwrap();

        // Listable through read and write caps alike
        assert_eq!(
            grid.list_directory(&read).await.unwrap().get("entry"),
            Some(&blob)
        );
        assert_eq!(
            grid.list_directory(&write).await.unwrap().get("entry"),
            Some(&blob)
        );
    }

    #[tokio::test]
    async fn test_conditional_link() {
        let grid = MemoryGrid::new();
        let (write, _) = grid.create_mutable_directory().await.unwrap();
        let v1 = grid.put_immutable(b"v1".to_vec()).await.unwrap();
        let v2 = grid.put_immutable(b"v2".to_vec()).await.unwrap();

        grid.link(&write, "f", &v1, None).await.unwrap();

        // Wrong expectation fails
        let err = grid.link(&write, "f", &v2, None).await.unwrap_err();
        assert!(!err.is_transient());

        // Correct expectation succeeds
        grid.link(&write, "f", &v2, Some(&v1)).await.unwrap();

        // Relinking the current value is a no-op regardless of expectation
        grid.link(&write, "f", &v2, Some(&v1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlink() {
        let grid = MemoryGrid::new();
        let (write, read) = grid.create_mutable_directory().await.unwrap();
        let blob = grid.put_immutable(b"x".to_vec()).await.unwrap();

        grid.link(&write, "entry", &blob, None).await.unwrap();
        grid.unlink(&write, "entry").await.unwrap();
        assert!(grid.list_directory(&read).await.unwrap().is_empty());
        assert!(grid.unlink(&write, "entry").await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let grid = MemoryGrid::new();
        let peer = grid.clone();

        let cap = grid.put_immutable(b"shared".to_vec()).await.unwrap();
        assert_eq!(peer.get_immutable(&cap).await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn test_fault_injection_then_success() {
        let grid = MemoryGrid::new();
        grid.fail_next(2);

        assert!(grid.put_immutable(b"x".to_vec()).await.is_err());
        assert!(grid.put_immutable(b"x".to_vec()).await.is_err());
        assert!(grid.put_immutable(b"x".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delayed_fault_injection() {
        let grid = MemoryGrid::new();
        grid.fail_after(2, 1);

        assert!(grid.put_immutable(b"a".to_vec()).await.is_ok());
        assert!(grid.put_immutable(b"b".to_vec()).await.is_ok());
        assert!(grid.put_immutable(b"c".to_vec()).await.is_err());
        assert!(grid.put_immutable(b"c".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_object_sizes() {
        let grid = MemoryGrid::new();
        let blob = grid.put_immutable(vec![0u8; 800]).await.unwrap();
        assert_eq!(grid.object_sizes(&blob).await.unwrap(), 800);

        let mut entries = DirectoryListing::new();
        entries.insert("content".into(), blob);
        let dir = grid.create_immutable_directory(entries).await.unwrap();
        assert!(grid.object_sizes(&dir).await.unwrap() > 0);
    }
}
