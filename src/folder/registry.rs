//! Folder registry
//!
//! The only process-wide structure: name → running folder engine. Each
//! engine runs on its own task and owns its store, stash, and timers;
//! the registry only creates them, hands out command handles, and tears
//! them down at shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::config::FolderConfig;
use super::engine::{FolderCommand, FolderEngine, FolderStatus};
use super::errors::{FolderError, FolderResult};
use crate::grid::Grid;
use crate::relpath::RelativePath;

/// How long shutdown waits for a folder's in-flight work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Command queue depth per folder.
const COMMAND_BUFFER: usize = 32;

/// A handle for driving one running folder engine.
#[derive(Clone, Debug)]
pub struct FolderHandle {
    name: String,
    tx: mpsc::Sender<FolderCommand>,
}

impl FolderHandle {
    /// The folder's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> FolderCommand,
    ) -> FolderResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| FolderError::NotFound(format!("folder {:?} is stopped", self.name)))?;
        rx.await
            .map_err(|_| FolderError::NotFound(format!("folder {:?} is stopped", self.name)))
    }

    /// Capture and upload a snapshot of one path.
    pub async fn snapshot(&self, path: RelativePath) -> FolderResult<()> {
        self.request(|reply| FolderCommand::Snapshot { path, reply })
            .await?
    }

    /// Run one scan pass; returns the number of captures.
    pub async fn scan(&self) -> FolderResult<usize> {
        self.request(|reply| FolderCommand::Scan { reply }).await?
    }

    /// Run one upload pass.
    pub async fn upload(&self) -> FolderResult<()> {
        self.request(|reply| FolderCommand::Upload { reply }).await?
    }

    /// Run one poll pass.
    pub async fn poll(&self) -> FolderResult<()> {
        self.request(|reply| FolderCommand::Poll { reply }).await?
    }

    /// Current folder status.
    pub async fn status(&self) -> FolderResult<FolderStatus> {
        self.request(|reply| FolderCommand::Status { reply }).await
    }

    /// Object sizes behind a path's remote snapshot.
    pub async fn tahoe_objects(&self, path: RelativePath) -> FolderResult<Vec<u64>> {
        self.request(|reply| FolderCommand::TahoeObjects { path, reply })
            .await?
    }

    /// Stop the engine.
    pub async fn shutdown(&self) -> FolderResult<()> {
        self.request(|reply| FolderCommand::Shutdown { reply }).await
    }
}

/// The process-wide folder registry.
pub struct FolderRegistry {
    folders: HashMap<String, (FolderHandle, JoinHandle<()>)>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self {
            folders: HashMap::new(),
        }
    }

    /// Open a folder engine and start its task.
    pub fn add(&mut self, config: FolderConfig, grid: Arc<dyn Grid>) -> FolderResult<FolderHandle> {
        let name = config.name.clone();
        if self.folders.contains_key(&name) {
            return Err(FolderError::Validation(format!(
                "folder {:?} is already registered",
                name
            )));
        }

        let engine = FolderEngine::open(config, grid)?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(engine.run(rx));

        let handle = FolderHandle {
            name: name.clone(),
            tx,
        };
        self.folders.insert(name, (handle.clone(), task));
        Ok(handle)
    }

    /// Look up a running folder.
    pub fn get(&self, name: &str) -> Option<&FolderHandle> {
        self.folders.get(name).map(|(handle, _)| handle)
    }

    /// Names of all running folders.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.folders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every folder, waiting up to the grace period for each.
    pub async fn shutdown_all(&mut self) {
        for (_, (handle, task)) in self.folders.drain() {
            let _ = handle.shutdown().await;
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
    }
}

impl Default for FolderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
