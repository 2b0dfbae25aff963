//! Abstract grid client
//!
//! The core never talks to storage servers directly; it holds an
//! `Arc<dyn Grid>` and calls the handful of operations below. A real client
//! (an HTTP gateway to the storage grid) lives outside this crate; the
//! in-memory [`MemoryGrid`] implements the same contract for tests and local
//! experimentation, including the content-addressing guarantee the uploader
//! relies on for idempotent retries.

mod errors;
mod memory;

pub use errors::{GridError, GridResult};
pub use memory::MemoryGrid;

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;

use crate::capability::Capability;

/// Directory listings are name → capability, in stable name order.
pub type DirectoryListing = BTreeMap<String, Capability>;

/// The operations the core requires of a grid.
///
/// Implementations must be thread-safe; callers tolerate interleaved
/// requests. Immutable uploads are content-addressed: putting bit-identical
/// bytes (or an identical directory map) any number of times yields the same
/// capability.
pub trait Grid: Send + Sync {
    /// Store an immutable blob, returning its immutable-file capability.
    fn put_immutable<'a>(&'a self, data: Vec<u8>) -> BoxFuture<'a, GridResult<Capability>>;

    /// Create an immutable directory from a name → capability map.
    fn create_immutable_directory<'a>(
        &'a self,
        entries: DirectoryListing,
    ) -> BoxFuture<'a, GridResult<Capability>>;

    /// Create an empty mutable directory, returning (write, read) caps.
    fn create_mutable_directory<'a>(
        &'a self,
    ) -> BoxFuture<'a, GridResult<(Capability, Capability)>>;

    /// List a directory (immutable, or mutable via read or write cap).
    fn list_directory<'a>(
        &'a self,
        cap: &'a Capability,
    ) -> BoxFuture<'a, GridResult<DirectoryListing>>;

    /// Create or replace a child of a mutable directory.
    ///
    /// When `replacing` is given, the write is conditional: it fails with a
    /// permanent error unless the entry currently points at that capability
    /// (or is absent when `replacing` is absent). Grids without conditional
    /// writes may ignore the hint; single-writer callers provide the mutual
    /// exclusion themselves.
    fn link<'a>(
        &'a self,
        write_cap: &'a Capability,
        name: &'a str,
        target: &'a Capability,
        replacing: Option<&'a Capability>,
    ) -> BoxFuture<'a, GridResult<()>>;

    /// Remove a child of a mutable directory.
    fn unlink<'a>(
        &'a self,
        write_cap: &'a Capability,
        name: &'a str,
    ) -> BoxFuture<'a, GridResult<()>>;

    /// Fetch the bytes of an immutable blob.
    fn get_immutable<'a>(&'a self, cap: &'a Capability) -> BoxFuture<'a, GridResult<Vec<u8>>>;

    /// The stored size in bytes of the object behind `cap`, for diagnostics.
    fn object_sizes<'a>(&'a self, cap: &'a Capability) -> BoxFuture<'a, GridResult<u64>>;
}
