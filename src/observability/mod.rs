//! Observability for gridsync
//!
//! Structured JSON logging only. Folder engines log lifecycle events
//! (snapshots created, uploads retried, conflicts detected) as single-line
//! JSON records so that operators can follow a folder's behaviour without
//! attaching a debugger.
//!
//! # Principles
//!
//! 1. Logging is read-only; no side effects on the engine
//! 2. One log line = one event
//! 3. Deterministic key ordering
//! 4. Synchronous writes, no buffering

mod logger;

pub use logger::{Logger, Severity};
