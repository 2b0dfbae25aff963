//! Per-file coordinator
//!
//! One state machine per (folder, path) serializes everything that can
//! happen to that path: local edits, uploads with backoff, and incoming
//! remote updates. The machine guarantees at most one active upload and at
//! most one active download per path, queues local changes that land during
//! an upload, and defers remote updates until an in-flight upload settles
//! so the update/conflict decision is made against fresh state.
//!
//! The machine holds no I/O; the folder engine drives it and performs the
//! actual work between transitions.

use thiserror::Error;

use crate::capability::Capability;

/// Result type for coordinator transitions
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Invalid transition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

/// The activity state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// No work in flight
    Idle,
    /// A local snapshot is being captured
    Snapshotting,
    /// A remote snapshot upload is in flight
    Uploading,
    /// The last upload failed transiently; a retry timer is pending
    UploadBackoff,
    /// A remote snapshot is being fetched and applied
    Downloading,
}

impl FileState {
    fn name(&self) -> &'static str {
        match self {
            FileState::Idle => "idle",
            FileState::Snapshotting => "snapshotting",
            FileState::Uploading => "uploading",
            FileState::UploadBackoff => "upload-backoff",
            FileState::Downloading => "downloading",
        }
    }
}

/// What the engine should do with a local-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalChangeAction {
    /// Capture a snapshot now
    Snapshot,
    /// Recorded; it will be captured after the in-flight work settles
    Queued,
}

/// What the engine should do with a remote-update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdateAction {
    /// Evaluate and apply the update now
    Download,
    /// Recorded; re-evaluate after the in-flight work settles
    Deferred,
}

/// A remote update noticed while the path was busy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRemote {
    pub participant: String,
    pub cap: Capability,
}

/// The per-path state machine.
#[derive(Debug)]
pub struct FileCoordinator {
    state: FileState,
    /// Informational: a conflict file exists for this path
    conflicted: bool,
    /// A local change arrived during an upload; capture it afterwards
    queued_change: bool,
    /// A remote update arrived during in-flight work
    deferred_remote: Option<DeferredRemote>,
    /// Consecutive failed upload attempts
    attempts: u32,
    /// Last recorded error, for status queries
    last_error: Option<String>,
}

impl FileCoordinator {
    pub fn new() -> Self {
        Self {
            state: FileState::Idle,
            conflicted: false,
            queued_change: false,
            deferred_remote: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> FileState {
        self.state
    }

    /// Whether an unresolved conflict is recorded for this path.
    pub fn is_conflicted(&self) -> bool {
        self.conflicted
    }

    /// Consecutive failed upload attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The last recorded error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn invalid(&self, event: &'static str) -> CoordinatorError {
        CoordinatorError::InvalidTransition {
            state: self.state.name(),
            event,
        }
    }

    /// A local edit was observed.
    pub fn note_local_change(&mut self) -> LocalChangeAction {
        match self.state {
            FileState::Idle => LocalChangeAction::Snapshot,
            // Busy: the change is captured after the current work settles.
            // The store chains it as a child of the pending head anyway.
            _ => {
                self.queued_change = true;
                LocalChangeAction::Queued
            }
        }
    }

    /// A peer published a new remote snapshot for this path.
    pub fn note_remote_update(&mut self, participant: &str, cap: &Capability) -> RemoteUpdateAction {
        match self.state {
            FileState::Idle => RemoteUpdateAction::Download,
            _ => {
                self.deferred_remote = Some(DeferredRemote {
                    participant: participant.to_string(),
                    cap: cap.clone(),
                });
                RemoteUpdateAction::Deferred
            }
        }
    }

    /// Begin capturing a local snapshot.
    pub fn begin_snapshot(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Idle => {
                self.state = FileState::Snapshotting;
                Ok(())
            }
            _ => Err(self.invalid("snapshot")),
        }
    }

    /// The capture finished; the path is ready to upload.
    ///
    /// A successful capture also clears the conflicted marker: the new
    /// snapshot's ancestry includes the divergent version, so the edit is
    /// the resolution.
    pub fn snapshot_succeeded(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Snapshotting => {
                self.state = FileState::Idle;
                self.conflicted = false;
                self.last_error = None;
                Ok(())
            }
            _ => Err(self.invalid("finish snapshot")),
        }
    }

    /// The capture failed.
    pub fn snapshot_failed(&mut self, error: impl Into<String>) -> CoordinatorResult<()> {
        match self.state {
            FileState::Snapshotting => {
                self.state = FileState::Idle;
                self.last_error = Some(error.into());
                Ok(())
            }
            _ => Err(self.invalid("fail snapshot")),
        }
    }

    /// Begin uploading the pending chain.
    pub fn begin_upload(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Idle => {
                self.state = FileState::Uploading;
                Ok(())
            }
            _ => Err(self.invalid("upload")),
        }
    }

    /// The upload committed.
    pub fn upload_succeeded(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Uploading => {
                self.state = FileState::Idle;
                self.attempts = 0;
                self.last_error = None;
                Ok(())
            }
            _ => Err(self.invalid("finish upload")),
        }
    }

    /// The upload failed transiently; a retry is due after backoff.
    pub fn upload_failed_retryable(&mut self, error: impl Into<String>) -> CoordinatorResult<()> {
        match self.state {
            FileState::Uploading => {
                self.state = FileState::UploadBackoff;
                self.attempts += 1;
                self.last_error = Some(error.into());
                Ok(())
            }
            _ => Err(self.invalid("fail upload")),
        }
    }

    /// The retry timer fired.
    pub fn retry_upload(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::UploadBackoff => {
                self.state = FileState::Uploading;
                Ok(())
            }
            _ => Err(self.invalid("retry upload")),
        }
    }

    /// Begin fetching and applying a remote snapshot.
    pub fn begin_download(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Idle => {
                self.state = FileState::Downloading;
                Ok(())
            }
            _ => Err(self.invalid("download")),
        }
    }

    /// The download finished (applied, ignored, or conflicted).
    pub fn download_finished(&mut self) -> CoordinatorResult<()> {
        match self.state {
            FileState::Downloading => {
                self.state = FileState::Idle;
                self.last_error = None;
                Ok(())
            }
            _ => Err(self.invalid("finish download")),
        }
    }

    /// The download failed; a later poll retries.
    pub fn download_failed(&mut self, error: impl Into<String>) -> CoordinatorResult<()> {
        match self.state {
            FileState::Downloading => {
                self.state = FileState::Idle;
                self.last_error = Some(error.into());
                Ok(())
            }
            _ => Err(self.invalid("fail download")),
        }
    }

    /// Record that a conflict file was surfaced for this path.
    pub fn mark_conflicted(&mut self) {
        self.conflicted = true;
    }

    /// Take the queued local change, if one arrived during in-flight work.
    pub fn take_queued_change(&mut self) -> bool {
        std::mem::take(&mut self.queued_change)
    }

    /// Take the deferred remote update, if one arrived during in-flight
    /// work.
    pub fn take_deferred_remote(&mut self) -> Option<DeferredRemote> {
        self.deferred_remote.take()
    }
}

impl Default for FileCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(s: &str) -> Capability {
        Capability::parse(&format!("URI:DIR2-CHK:{}", s)).unwrap()
    }

    #[test]
    fn test_snapshot_then_upload_cycle() {
        let mut fc = FileCoordinator::new();
        assert_eq!(fc.state(), FileState::Idle);

        assert_eq!(fc.note_local_change(), LocalChangeAction::Snapshot);
        fc.begin_snapshot().unwrap();
        assert_eq!(fc.state(), FileState::Snapshotting);
        fc.snapshot_succeeded().unwrap();

        fc.begin_upload().unwrap();
        assert_eq!(fc.state(), FileState::Uploading);
        fc.upload_succeeded().unwrap();
        assert_eq!(fc.state(), FileState::Idle);
    }

    #[test]
    fn test_at_most_one_upload() {
        let mut fc = FileCoordinator::new();
        fc.begin_upload().unwrap();

        assert_eq!(
            fc.begin_upload(),
            Err(CoordinatorError::InvalidTransition {
                state: "uploading",
                event: "upload"
            })
        );
    }

    #[test]
    fn test_at_most_one_download() {
        let mut fc = FileCoordinator::new();
        fc.begin_download().unwrap();
        assert!(fc.begin_download().is_err());
        assert!(fc.begin_upload().is_err());
    }

    #[test]
    fn test_local_change_during_upload_queues() {
        let mut fc = FileCoordinator::new();
        fc.begin_upload().unwrap();

        assert_eq!(fc.note_local_change(), LocalChangeAction::Queued);
        fc.upload_succeeded().unwrap();

        assert!(fc.take_queued_change());
        assert!(!fc.take_queued_change(), "queued change is consumed");
    }

    #[test]
    fn test_remote_update_during_upload_defers() {
        let mut fc = FileCoordinator::new();
        fc.begin_upload().unwrap();

        assert_eq!(
            fc.note_remote_update("bob", &cap("theirs")),
            RemoteUpdateAction::Deferred
        );
        fc.upload_succeeded().unwrap();

        let deferred = fc.take_deferred_remote().unwrap();
        assert_eq!(deferred.participant, "bob");
        assert_eq!(deferred.cap, cap("theirs"));
        assert!(fc.take_deferred_remote().is_none());
    }

    #[test]
    fn test_remote_update_while_idle_downloads() {
        let mut fc = FileCoordinator::new();
        assert_eq!(
            fc.note_remote_update("bob", &cap("theirs")),
            RemoteUpdateAction::Download
        );
    }

    #[test]
    fn test_backoff_counts_attempts() {
        let mut fc = FileCoordinator::new();

        fc.begin_upload().unwrap();
        fc.upload_failed_retryable("grid unreachable").unwrap();
        assert_eq!(fc.state(), FileState::UploadBackoff);
        assert_eq!(fc.attempts(), 1);
        assert_eq!(fc.last_error(), Some("grid unreachable"));

        fc.retry_upload().unwrap();
        fc.upload_failed_retryable("still unreachable").unwrap();
        assert_eq!(fc.attempts(), 2);

        fc.retry_upload().unwrap();
        fc.upload_succeeded().unwrap();
        assert_eq!(fc.attempts(), 0);
        assert_eq!(fc.last_error(), None);
    }

    #[test]
    fn test_local_changes_queue_during_backoff() {
        let mut fc = FileCoordinator::new();
        fc.begin_upload().unwrap();
        fc.upload_failed_retryable("outage").unwrap();

        assert_eq!(fc.note_local_change(), LocalChangeAction::Queued);
    }

    #[test]
    fn test_snapshot_failure_records_error() {
        let mut fc = FileCoordinator::new();
        fc.begin_snapshot().unwrap();
        fc.snapshot_failed("file unreadable").unwrap();

        assert_eq!(fc.state(), FileState::Idle);
        assert_eq!(fc.last_error(), Some("file unreadable"));
    }

    #[test]
    fn test_download_failure_returns_to_idle() {
        let mut fc = FileCoordinator::new();
        fc.begin_download().unwrap();
        fc.download_failed("grid unreachable").unwrap();

        assert_eq!(fc.state(), FileState::Idle);
        assert!(fc.begin_download().is_ok(), "a later poll retries");
    }

    #[test]
    fn test_conflict_marker_cleared_by_resolution() {
        let mut fc = FileCoordinator::new();
        fc.mark_conflicted();
        assert!(fc.is_conflicted());

        // The user edits the file; the capture is the resolution
        fc.begin_snapshot().unwrap();
        fc.snapshot_succeeded().unwrap();
        assert!(!fc.is_conflicted());
    }

    #[test]
    fn test_retry_only_from_backoff() {
        let mut fc = FileCoordinator::new();
        assert!(fc.retry_upload().is_err());
        fc.begin_upload().unwrap();
        assert!(fc.retry_upload().is_err());
    }
}
