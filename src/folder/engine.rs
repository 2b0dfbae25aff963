//! Folder engine
//!
//! One engine per folder, running as a single task: every store
//! transaction, stash touch, grid call, and state-machine transition for
//! the folder happens on this task, so nothing in the folder needs a lock.
//! The run loop multiplexes the command channel, the scan and poll timers,
//! and the earliest upload-retry deadline.
//!
//! On startup the engine makes one upload pass before entering the loop,
//! so work left behind by a crash drains promptly.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, Interval};

use super::config::FolderConfig;
use super::errors::{FolderError, FolderResult};
use crate::capability::Capability;
use crate::coordinator::{FileCoordinator, FileState, RemoteUpdateAction};
use crate::downloader::{Downloader, Outcome};
use crate::grid::Grid;
use crate::observability::Logger;
use crate::relpath::RelativePath;
use crate::scanner::Scanner;
use crate::snapshot::SnapshotCreator;
use crate::stash::Stash;
use crate::store::SnapshotStore;
use crate::uploader::{RemoteSnapshotCreator, RetrySchedule, UploadError};

/// Commands the engine accepts over its channel. These double as the
/// programmatic API the CLI and the tests drive.
pub enum FolderCommand {
    /// Capture (and then upload) a snapshot of one path
    Snapshot {
        path: RelativePath,
        reply: oneshot::Sender<FolderResult<()>>,
    },
    /// Run one scan pass; replies with the number of captures
    Scan {
        reply: oneshot::Sender<FolderResult<usize>>,
    },
    /// Run one upload pass over all pending paths
    Upload {
        reply: oneshot::Sender<FolderResult<()>>,
    },
    /// Run one poll pass over all remote participants
    Poll {
        reply: oneshot::Sender<FolderResult<()>>,
    },
    /// Current folder status
    Status {
        reply: oneshot::Sender<FolderStatus>,
    },
    /// Sizes of the on-grid objects behind a path's remote snapshot
    TahoeObjects {
        path: RelativePath,
        reply: oneshot::Sender<FolderResult<Vec<u64>>>,
    },
    /// Stop the engine
    Shutdown { reply: oneshot::Sender<()> },
}

/// A folder's observable state.
#[derive(Debug, Clone, Serialize)]
pub struct FolderStatus {
    pub name: String,
    /// Fatal error that halted the folder, if any
    pub halted: Option<String>,
    /// Paths with pending local snapshots and their chain lengths
    pub pending: Vec<(String, usize)>,
    /// Paths with a known remote snapshot and its capability
    pub remotes: Vec<(String, String)>,
    /// Recorded conflicts as (path, participant)
    pub conflicts: Vec<(String, String)>,
}

/// The per-folder engine.
pub struct FolderEngine {
    config: FolderConfig,
    store: SnapshotStore,
    stash: Stash,
    grid: Arc<dyn Grid>,
    creator: SnapshotCreator,
    scanner: Scanner,
    uploader: RemoteSnapshotCreator,
    downloader: Downloader,
    schedule: RetrySchedule,
    files: HashMap<RelativePath, FileCoordinator>,
    retry_at: HashMap<RelativePath, Instant>,
    halted: Option<String>,
}

impl FolderEngine {
    /// Open the folder's durable state and wire up the components.
    pub fn open(config: FolderConfig, grid: Arc<dyn Grid>) -> FolderResult<Self> {
        config.validate()?;
        let author = config.author()?;

        let store = SnapshotStore::open(config.store_path())?;
        let stash = Stash::open(config.stash_path())
            .map_err(|e| FolderError::Transient(e.to_string()))?;

        // Sweep stash files orphaned by a crash between a remote advance
        // and the release of its chain's blobs.
        let referenced = store.referenced_stash_names();
        if let Ok(entries) = std::fs::read_dir(stash.dir()) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !referenced.contains(&name) {
                    let _ = stash.release(&name);
                }
            }
        }

        let creator = SnapshotCreator::new(author.clone(), &config.magic_path);
        let scanner = Scanner::new(&config.name, &config.magic_path);
        let uploader = RemoteSnapshotCreator::new(
            Arc::clone(&grid),
            author,
            config.personal.clone(),
            &config.name,
        );
        let downloader = Downloader::new(
            Arc::clone(&grid),
            config.collective.clone(),
            &config.author_name,
            &config.magic_path,
            &config.name,
            config.ancestry_depth,
        );
        let schedule = config.retry_schedule();

        Ok(Self {
            config,
            store,
            stash,
            grid,
            creator,
            scanner,
            uploader,
            downloader,
            schedule,
            files: HashMap::new(),
            retry_at: HashMap::new(),
            halted: None,
        })
    }

    /// The folder's name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn check_halted(&self) -> FolderResult<()> {
        match &self.halted {
            Some(reason) => Err(FolderError::Fatal(reason.clone())),
            None => Ok(()),
        }
    }

    fn halt(&mut self, reason: String) {
        Logger::fatal(
            "FOLDER_HALTED",
            &[
                ("folder", self.config.name.as_str()),
                ("reason", reason.as_str()),
            ],
        );
        self.halted = Some(reason);
    }

    fn machine(&mut self, path: &RelativePath) -> &mut FileCoordinator {
        self.files.entry(path.clone()).or_default()
    }

    /// Capture one path (API call or scanner finding). Returns whether a
    /// snapshot was actually taken now.
    fn capture_change(&mut self, path: &RelativePath, deletion: bool) -> FolderResult<bool> {
        self.check_halted()?;

        match self.machine(path).state() {
            FileState::Idle => {
                self.machine(path).begin_snapshot().expect("idle accepts snapshot");
                let result = if deletion {
                    self.creator.capture_deletion(&mut self.store, path)
                } else {
                    self.creator.capture(&mut self.store, &self.stash, path)
                };
                match result {
                    Ok(snapshot) => {
                        self.machine(path)
                            .snapshot_succeeded()
                            .expect("snapshotting accepts success");
                        Logger::info(
                            "SNAPSHOT_CREATED",
                            &[
                                ("folder", self.config.name.as_str()),
                                ("path", path.as_str()),
                                ("snapshot_id", &snapshot.id.to_string()),
                            ],
                        );
                        Ok(true)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.machine(path)
                            .snapshot_failed(&message)
                            .expect("snapshotting accepts failure");
                        if e.is_fatal() {
                            self.halt(message.clone());
                            Err(FolderError::Fatal(message))
                        } else if e.code() == crate::snapshot::SnapshotErrorCode::SyncSnapshotValidation {
                            Err(FolderError::Validation(message))
                        } else {
                            Err(FolderError::Transient(message))
                        }
                    }
                }
            }
            // In backoff the capture happens immediately; the store chains
            // it onto the pending head, and the retry uploads the grown
            // chain.
            FileState::UploadBackoff => {
                let result = if deletion {
                    self.creator.capture_deletion(&mut self.store, path)
                } else {
                    self.creator.capture(&mut self.store, &self.stash, path)
                };
                result.map_err(|e| {
                    if e.code() == crate::snapshot::SnapshotErrorCode::SyncSnapshotValidation {
                        FolderError::Validation(e.to_string())
                    } else {
                        FolderError::Transient(e.to_string())
                    }
                })?;
                Ok(true)
            }
            _ => {
                self.machine(path).note_local_change();
                Ok(false)
            }
        }
    }

    /// Capture a path and start (or schedule) its upload. The API-level
    /// "add snapshot" operation: success means the local snapshot is
    /// durable; the upload proceeds with retries on its own.
    pub async fn snapshot_path(&mut self, path: &RelativePath) -> FolderResult<()> {
        self.check_halted()?;

        let exists = path
            .resolve_within(&self.config.magic_path)
            .map_err(|e| FolderError::Validation(e.to_string()))?
            .exists();
        let tracked =
            self.store.get_local(path).is_ok() || self.store.get_remote(path).is_ok();

        if exists {
            self.capture_change(path, false)?;
        } else if tracked {
            self.capture_change(path, true)?;
        } else {
            return Err(FolderError::NotFound(format!(
                "{:?} does not exist in the folder",
                path.as_str()
            )));
        }

        // Upload failures here are not the caller's problem: the snapshot
        // is durable and the retry timer owns the rest.
        let _ = self.upload_path(path).await;
        self.check_halted()
    }

    /// Upload the pending chain for one path, honouring the state machine.
    async fn upload_path(&mut self, path: &RelativePath) -> FolderResult<()> {
        self.check_halted()?;

        loop {
            {
                let machine = self.machine(path);
                match machine.state() {
                    FileState::Idle => machine.begin_upload().expect("idle accepts upload"),
                    FileState::UploadBackoff => {
                        machine.retry_upload().expect("backoff accepts retry")
                    }
                    // Already busy; at most one upload per path.
                    _ => return Ok(()),
                }
            }

            if self.store.get_local(path).is_err() {
                // Nothing pending after all (raced with a remote advance).
                self.machine(path)
                    .upload_succeeded()
                    .expect("uploading accepts success");
                self.retry_at.remove(path);
                return Ok(());
            }

            match self
                .uploader
                .upload_chain(&mut self.store, &self.stash, path)
                .await
            {
                Ok(_) => {
                    self.retry_at.remove(path);
                    let machine = self.files.get_mut(path).expect("machine exists");
                    machine.upload_succeeded().expect("uploading accepts success");

                    if machine.take_queued_change() {
                        // A change landed during the upload: capture it and
                        // go around again.
                        self.capture_change(path, false)?;
                        continue;
                    }
                    if let Some(deferred) = self.files.get_mut(path).and_then(|m| m.take_deferred_remote()) {
                        self.apply_remote(path, &deferred.participant, &deferred.cap)
                            .await?;
                    }
                    return Ok(());
                }
                Err(UploadError::Transient(message)) => {
                    let machine = self.files.get_mut(path).expect("machine exists");
                    machine
                        .upload_failed_retryable(&message)
                        .expect("uploading accepts failure");
                    let attempts = machine.attempts();
                    let delay = self.schedule.delay(attempts);
                    self.retry_at.insert(path.clone(), Instant::now() + delay);
                    Logger::warn(
                        "UPLOAD_RETRY",
                        &[
                            ("folder", self.config.name.as_str()),
                            ("path", path.as_str()),
                            ("attempts", &attempts.to_string()),
                            ("delay_seconds", &delay.as_secs().to_string()),
                            ("reason", message.as_str()),
                        ],
                    );
                    return Err(FolderError::Transient(message));
                }
                Err(UploadError::Fatal(message)) => {
                    self.halt(message.clone());
                    return Err(FolderError::Fatal(message));
                }
            }
        }
    }

    /// One upload pass over every path with pending local snapshots.
    pub async fn upload_pending(&mut self) -> FolderResult<()> {
        self.check_halted()?;

        for path in self.store.all_local_paths() {
            // Paths waiting out a backoff keep waiting.
            if let Some(deadline) = self.retry_at.get(&path) {
                if *deadline > Instant::now() {
                    continue;
                }
            }
            match self.upload_path(&path).await {
                Ok(()) | Err(FolderError::Transient(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Retry every path whose backoff deadline has passed.
    async fn retry_due(&mut self) {
        let now = Instant::now();
        let due: Vec<RelativePath> = self
            .retry_at
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            let _ = self.upload_path(&path).await;
        }
    }

    /// Evaluate one peer entry against our state and dispatch.
    async fn apply_remote(
        &mut self,
        path: &RelativePath,
        participant: &str,
        their_cap: &Capability,
    ) -> FolderResult<()> {
        match self.machine(path).note_remote_update(participant, their_cap) {
            RemoteUpdateAction::Deferred => return Ok(()),
            RemoteUpdateAction::Download => {}
        }
        self.machine(path)
            .begin_download()
            .expect("idle accepts download");

        match self
            .downloader
            .process_entry(&mut self.store, path, participant, their_cap)
            .await
        {
            Ok(outcome) => {
                if let Outcome::Conflicted { .. } = outcome {
                    self.machine(path).mark_conflicted();
                }
                self.machine(path)
                    .download_finished()
                    .expect("downloading accepts finish");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.machine(path)
                    .download_failed(&message)
                    .expect("downloading accepts failure");
                if e.is_transient() {
                    Logger::warn(
                        "REMOTE_UPDATE_FAILED",
                        &[
                            ("folder", self.config.name.as_str()),
                            ("path", path.as_str()),
                            ("reason", message.as_str()),
                        ],
                    );
                    Err(FolderError::Transient(message))
                } else {
                    self.halt(message.clone());
                    Err(FolderError::Fatal(message))
                }
            }
        }
    }

    /// One poll pass: refresh the collective, then evaluate every entry of
    /// every remote participant's personal directory.
    pub async fn poll_remote(&mut self) -> FolderResult<()> {
        self.check_halted()?;

        let participants = self
            .downloader
            .participants()
            .await
            .map_err(|e| FolderError::Transient(e.to_string()))?;

        for (participant, personal) in participants {
            let entries = match self.downloader.personal_entries(&personal).await {
                Ok(entries) => entries,
                Err(e) => {
                    Logger::warn(
                        "PARTICIPANT_UNREADABLE",
                        &[
                            ("folder", self.config.name.as_str()),
                            ("participant", participant.as_str()),
                            ("reason", &e.to_string()),
                        ],
                    );
                    continue;
                }
            };
            for (path, their_cap) in entries {
                match self.apply_remote(&path, &participant, &their_cap).await {
                    Ok(()) | Err(FolderError::Transient(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// One scan pass: capture changes and deletions, then upload.
    pub async fn scan_once(&mut self) -> FolderResult<usize> {
        self.check_halted()?;

        let report = self.scanner.scan(&self.store);
        let mut captured = 0;
        for path in report.changed {
            match self.capture_change(&path, false) {
                Ok(true) => captured += 1,
                Ok(false) => {}
                Err(FolderError::Fatal(e)) => return Err(FolderError::Fatal(e)),
                // Scanner findings that fail to capture are logged and
                // skipped; the next scan retries them.
                Err(_) => {}
            }
        }
        for path in report.deleted {
            match self.capture_change(&path, true) {
                Ok(true) => captured += 1,
                Ok(false) => {}
                Err(FolderError::Fatal(e)) => return Err(FolderError::Fatal(e)),
                Err(_) => {}
            }
        }

        if captured > 0 {
            match self.upload_pending().await {
                Ok(()) | Err(FolderError::Transient(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(captured)
    }

    /// Sizes of the on-grid objects behind a path's current remote
    /// snapshot: (snapshot directory, content blob, metadata blob).
    pub async fn tahoe_objects(&mut self, path: &RelativePath) -> FolderResult<Vec<u64>> {
        self.check_halted()?;

        let caps = self.store.remote_object_caps(path)?.clone();
        let mut sizes = Vec::with_capacity(3);
        sizes.push(self.object_size(&caps.snapshot).await?);
        sizes.push(match &caps.content {
            Some(cap) => self.object_size(cap).await?,
            None => 0,
        });
        sizes.push(self.object_size(&caps.metadata).await?);
        Ok(sizes)
    }

    async fn object_size(&self, cap: &Capability) -> FolderResult<u64> {
        self.grid
            .object_sizes(cap)
            .await
            .map_err(|e| FolderError::Transient(e.to_string()))
    }

    /// Current observable state.
    pub fn status(&self) -> FolderStatus {
        FolderStatus {
            name: self.config.name.clone(),
            halted: self.halted.clone(),
            pending: self
                .store
                .all_local_paths()
                .into_iter()
                .map(|path| {
                    let chain = self.store.local_chain(&path).map(|c| c.len()).unwrap_or(0);
                    (path.as_str().to_string(), chain)
                })
                .collect(),
            remotes: self
                .store
                .remote_paths()
                .into_iter()
                .filter_map(|path| {
                    self.store
                        .get_remote(&path)
                        .ok()
                        .map(|cap| (path.as_str().to_string(), cap.to_string()))
                })
                .collect(),
            conflicts: self
                .store
                .conflicts()
                .iter()
                .map(|c| (c.path.as_str().to_string(), c.participant.clone()))
                .collect(),
        }
    }

    /// The engine's event loop. Consumes the engine; all folder activity
    /// happens on the task that runs this future.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FolderCommand>) {
        Logger::info("FOLDER_STARTED", &[("folder", self.config.name.as_str())]);

        // Drain whatever a previous process left behind.
        let _ = self.upload_pending().await;

        let mut scan_timer = make_timer(self.config.scan_interval_seconds);
        let mut poll_timer = make_timer(self.config.poll_interval_seconds);

        loop {
            let next_retry = self.retry_at.values().min().copied();

            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tick(&mut scan_timer), if scan_timer.is_some() => {
                    let _ = self.scan_once().await;
                }
                _ = tick(&mut poll_timer), if poll_timer.is_some() => {
                    let _ = self.poll_remote().await;
                }
                _ = tokio::time::sleep_until(next_retry.unwrap_or_else(Instant::now)),
                    if next_retry.is_some() =>
                {
                    self.retry_due().await;
                }
            }
        }

        Logger::info("FOLDER_STOPPED", &[("folder", self.config.name.as_str())]);
    }

    /// Dispatch one command; returns false on shutdown.
    async fn handle(&mut self, command: FolderCommand) -> bool {
        match command {
            FolderCommand::Snapshot { path, reply } => {
                let _ = reply.send(self.snapshot_path(&path).await);
            }
            FolderCommand::Scan { reply } => {
                let _ = reply.send(self.scan_once().await);
            }
            FolderCommand::Upload { reply } => {
                let _ = reply.send(self.upload_pending().await);
            }
            FolderCommand::Poll { reply } => {
                let _ = reply.send(self.poll_remote().await);
            }
            FolderCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            FolderCommand::TahoeObjects { path, reply } => {
                let _ = reply.send(self.tahoe_objects(&path).await);
            }
            FolderCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

fn make_timer(interval_seconds: u64) -> Option<Interval> {
    if interval_seconds == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_seconds);
    // First fire one period from now, not immediately.
    Some(tokio::time::interval_at(Instant::now() + period, period))
}

async fn tick(timer: &mut Option<Interval>) {
    timer.as_mut().expect("guarded by is_some").tick().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::author::LocalAuthor;
    use crate::folder::RetryConfig;
    use crate::grid::MemoryGrid;
    use tempfile::TempDir;

    async fn engine_for(
        grid: &MemoryGrid,
        collective_write: &Capability,
        name: &str,
        temp: &TempDir,
    ) -> FolderEngine {
        let magic = temp.path().join(format!("magic-{}", name));
        std::fs::create_dir_all(&magic).unwrap();

        let (personal_write, personal_read) = grid.create_mutable_directory().await.unwrap();
        grid.link(collective_write, name, &personal_read, None)
            .await
            .unwrap();

        let config = FolderConfig {
            name: format!("folder-{}", name),
            magic_path: magic,
            state_path: temp.path().join(format!("state-{}", name)),
            author_name: name.to_string(),
            signing_key: LocalAuthor::generate(name).signing_key_base64(),
            collective: collective_write.to_read().unwrap(),
            personal: personal_write,
            poll_interval_seconds: 0,
            scan_interval_seconds: 0,
            upload_retry: RetryConfig::default(),
            ancestry_depth: 1000,
        };
        FolderEngine::open(config, Arc::new(grid.clone())).unwrap()
    }

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_and_publish() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut alice = engine_for(&grid, &collective_write, "alice", &temp).await;

        std::fs::write(alice.config.magic_path.join("sylvester"), b"zero\n").unwrap();
        alice.snapshot_path(&rel("sylvester")).await.unwrap();

        let status = alice.status();
        assert!(status.pending.is_empty(), "chain uploaded: {:?}", status.pending);
        assert_eq!(status.remotes.len(), 1);
        assert!(status.halted.is_none());
    }

    #[tokio::test]
    async fn test_scan_captures_and_uploads() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut alice = engine_for(&grid, &collective_write, "alice", &temp).await;

        std::fs::write(alice.config.magic_path.join("a"), b"1").unwrap();
        std::fs::write(alice.config.magic_path.join("b"), b"2").unwrap();

        let captured = alice.scan_once().await.unwrap();
        assert_eq!(captured, 2);
        assert_eq!(alice.status().remotes.len(), 2);

        // Quiet when nothing changed
        assert_eq!(alice.scan_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_two_engines_synchronize() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut alice = engine_for(&grid, &collective_write, "alice", &temp).await;
        let mut bob = engine_for(&grid, &collective_write, "bob", &temp).await;

        std::fs::write(alice.config.magic_path.join("sylvester"), b"zero\n").unwrap();
        alice.snapshot_path(&rel("sylvester")).await.unwrap();

        bob.poll_remote().await.unwrap();
        assert_eq!(
            std::fs::read(bob.config.magic_path.join("sylvester")).unwrap(),
            b"zero\n"
        );
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut alice = engine_for(&grid, &collective_write, "alice", &temp).await;

        std::fs::write(alice.config.magic_path.join("sylvester"), b"zero\n").unwrap();

        grid.fail_next(10);
        alice.snapshot_path(&rel("sylvester")).await.unwrap();

        // Snapshot is durable, upload is waiting out a backoff
        let status = alice.status();
        assert_eq!(status.pending, vec![("sylvester".to_string(), 1)]);
        assert!(alice.retry_at.contains_key(&rel("sylvester")));
        assert!(status.halted.is_none());

        // Grid recovers; the due retry publishes
        grid.fail_next(0);
        *alice.retry_at.get_mut(&rel("sylvester")).unwrap() = Instant::now();
        alice.retry_due().await;
        assert!(alice.status().pending.is_empty());
        assert_eq!(alice.status().remotes.len(), 1);
    }

    #[tokio::test]
    async fn test_tahoe_objects_reports_three_sizes() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let mut alice = engine_for(&grid, &collective_write, "alice", &temp).await;

        std::fs::write(alice.config.magic_path.join("sylvester"), vec![b'x'; 800]).unwrap();
        alice.snapshot_path(&rel("sylvester")).await.unwrap();

        let sizes = alice.tahoe_objects(&rel("sylvester")).await.unwrap();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[1], 800, "content blob size");
        assert!(sizes[0] > 0 && sizes[2] > 0);
    }

    #[tokio::test]
    async fn test_run_loop_processes_commands() {
        let grid = MemoryGrid::new();
        let (collective_write, _) = grid.create_mutable_directory().await.unwrap();
        let temp = TempDir::new().unwrap();
        let alice = engine_for(&grid, &collective_write, "alice", &temp).await;
        let magic = alice.config.magic_path.clone();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(alice.run(rx));

        std::fs::write(magic.join("sylvester"), b"zero\n").unwrap();
        let (reply, rx_reply) = oneshot::channel();
        tx.send(FolderCommand::Snapshot {
            path: rel("sylvester"),
            reply,
        })
        .await
        .unwrap();
        rx_reply.await.unwrap().unwrap();

        let (reply, rx_reply) = oneshot::channel();
        tx.send(FolderCommand::Status { reply }).await.unwrap();
        let status = rx_reply.await.unwrap();
        assert_eq!(status.remotes.len(), 1);

        let (reply, rx_reply) = oneshot::channel();
        tx.send(FolderCommand::Shutdown { reply }).await.unwrap();
        rx_reply.await.unwrap();
        task.await.unwrap();
    }
}
