use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_filter::{EventFilter, FilesystemEvent};
use super::local_watcher::{WatchError, WatchMessage, start_notify_watcher};
use super::range_planner::{RangeDescriptor, RangePlanner};
use crate::ledger::{AppendRequest, AppendResult, LedgerConnector, LedgerError, LedgerService};
use crate::storage::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Watching,
    Appending,
    Stopped,
}

/// Failure of a single append attempt. Never fatal to the watch loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("event path {0} has no file name")]
    NoFileName(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub file_name: String,
    pub range: RangeDescriptor,
    pub previous_rows: usize,
    pub result: AppendResult,
}

/// Turns finished downloads into ledger rows, one at a time.
///
/// `writer` is the single-writer lock: the read-count, plan, append sequence
/// runs entirely while it is held, so appends never interleave. It also owns
/// the ledger client, which is connected on first use and then reused.
pub struct Synchronizer<C: LedgerConnector> {
    connector: C,
    filter: EventFilter,
    planner: RangePlanner,
    writer: Mutex<Option<C::Ledger>>,
    state: watch::Sender<SyncState>,
}

impl<C: LedgerConnector> Synchronizer<C> {
    pub fn new(connector: C, filter: EventFilter, planner: RangePlanner) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            connector,
            filter,
            planner,
            writer: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Current number of ledger rows, read under the writer lock.
    pub async fn row_count(&self) -> Result<usize, SyncError> {
        let mut writer = self.writer.lock().await;
        let ledger = match writer.take() {
            Some(ledger) => ledger,
            None => self.connector.connect().await?,
        };
        let rows = ledger.read_all().await;
        *writer = Some(ledger);
        let rows = rows?;
        debug!(rows = ?rows, "ledger contents");
        Ok(rows.len())
    }

    /// Appends a row for `event` when it marks a finished download.
    pub async fn handle_event(
        &self,
        event: &FilesystemEvent,
    ) -> Result<Option<AppendOutcome>, SyncError> {
        if !self.filter.matches(event) {
            return Ok(None);
        }
        let file_name = event
            .file_name()
            .ok_or_else(|| SyncError::NoFileName(event.path.clone()))?;
        info!(file = %file_name, "download finished");
        self.append_entry(&file_name).await.map(Some)
    }

    /// Records `file_name` in the row after the last one currently present.
    /// Callers arriving while another append runs wait for it to finish.
    pub async fn append_entry(&self, file_name: &str) -> Result<AppendOutcome, SyncError> {
        let mut writer = self.writer.lock().await;
        let previous = self.state.send_replace(SyncState::Appending);

        let outcome = match writer.take() {
            Some(ledger) => Ok(ledger),
            None => self.connector.connect().await.map_err(SyncError::from),
        };
        let outcome = match outcome {
            Ok(ledger) => {
                let outcome = self.append_with(&ledger, file_name).await;
                *writer = Some(ledger);
                outcome
            }
            Err(err) => Err(err),
        };

        self.state.send_replace(previous);
        outcome
    }

    async fn append_with(
        &self,
        ledger: &C::Ledger,
        file_name: &str,
    ) -> Result<AppendOutcome, SyncError> {
        let previous_rows = ledger.read_all().await?.len();
        let range = self.planner.plan(previous_rows);
        debug!(file = %file_name, range = %range, previous_rows, "planned append");

        let request = AppendRequest::row(range.clone(), vec![Value::String(file_name.to_string())]);
        let result = ledger.append(request).await?;
        Ok(AppendOutcome {
            file_name: file_name.to_string(),
            range,
            previous_rows,
            result,
        })
    }

    /// Watches `directory` until `shutdown` fires or the watch itself fails.
    pub async fn run(&self, directory: &Path, shutdown: CancellationToken) -> Result<(), WatchError> {
        let (watcher, events) = match start_notify_watcher(directory) {
            Ok(pair) => pair,
            Err(err) => {
                self.state.send_replace(SyncState::Stopped);
                error!(directory = %directory.display(), error = %err, "failed to watch directory");
                return Err(err);
            }
        };
        info!(directory = %directory.display(), "watching for finished downloads");
        let result = self.dispatch(events, shutdown).await;
        drop(watcher);
        result
    }

    /// Handles events one by one in arrival order. Append failures are
    /// logged and skipped; watch failures end the loop.
    pub async fn dispatch(
        &self,
        mut events: mpsc::UnboundedReceiver<WatchMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), WatchError> {
        self.state.send_replace(SyncState::Watching);
        let result = loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                message = events.recv() => message,
            };
            match message {
                Some(Ok(event)) => self.process(&event).await,
                Some(Err(err)) => break Err(err),
                None => break Err(WatchError::ChannelClosed),
            }
        };
        self.state.send_replace(SyncState::Stopped);
        match &result {
            Ok(()) => info!("watch loop stopped"),
            Err(err) => error!(error = %err, "watch subsystem failed, stopping"),
        }
        result
    }

    async fn process(&self, event: &FilesystemEvent) {
        debug!(path = %event.path.display(), kind = ?event.kind, "filesystem event");
        match self.handle_event(event).await {
            Ok(Some(outcome)) => info!(
                file = %outcome.file_name,
                range = %outcome.range,
                updated_range = outcome.result.updated_range.as_deref().unwrap_or("-"),
                "download recorded"
            ),
            Ok(None) => {}
            Err(SyncError::Ledger(err)) => error!(
                path = %event.path.display(),
                class = ?err.classification(),
                error = %err,
                "failed to record download, event dropped"
            ),
            Err(err) => warn!(
                path = %event.path.display(),
                error = %err,
                "failed to record download, event dropped"
            ),
        }
    }
}

#[cfg(test)]
#[path = "synchronizer_tests.rs"]
mod tests;
