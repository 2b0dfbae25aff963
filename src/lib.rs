//! gridsync - directory synchronization over a capability grid
//!
//! Participants publish immutable, signed, content-addressed snapshots of
//! their files through a shared storage grid and observe each other's
//! published logs, detecting conflicts by snapshot ancestry.

pub mod author;
pub mod capability;
pub mod cli;
pub mod coordinator;
pub mod downloader;
pub mod folder;
pub mod grid;
pub mod observability;
pub mod relpath;
pub mod scanner;
pub mod snapshot;
pub mod stash;
pub mod store;
pub mod uploader;
