use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

use super::event_filter::{FilesystemEvent, OperationKind};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watched directory {path} is not accessible: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watched path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("watch subsystem error: {0}")]
    Notify(#[from] notify::Error),
    #[error("watched directory {0} was removed or moved away")]
    RootLost(PathBuf),
    #[error("watch event channel closed")]
    ChannelClosed,
}

pub type WatchMessage = Result<FilesystemEvent, WatchError>;

/// Subscribes to changes directly inside `root` (not its subdirectories).
/// The returned watcher must be kept alive for events to keep flowing.
pub fn start_notify_watcher(
    root: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<WatchMessage>), WatchError> {
    let root = root
        .canonicalize()
        .map_err(|source| WatchError::Inaccessible {
            path: root.to_path_buf(),
            source,
        })?;
    if !root.is_dir() {
        return Err(WatchError::NotADirectory(root));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let messages = match res {
            Ok(event) => map_event(&watch_root, event),
            Err(err) => vec![Err(WatchError::Notify(err))],
        };
        for message in messages {
            let _ = tx.send(message);
        }
    })
    .map_err(|source| WatchError::Subscribe {
        path: root.clone(),
        source,
    })?;
    watcher
        .watch(root.as_path(), RecursiveMode::NonRecursive)
        .map_err(|source| WatchError::Subscribe {
            path: root.clone(),
            source,
        })?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, event: Event) -> Vec<WatchMessage> {
    if root_lost(root, &event) {
        return vec![Err(WatchError::RootLost(root.to_path_buf()))];
    }
    FilesystemEvent::from_notify(event)
        .into_iter()
        .filter(|event| event.path != root)
        .map(Ok)
        .collect()
}

fn root_lost(root: &Path, event: &Event) -> bool {
    let kind = OperationKind::from(&event.kind);
    let removal = matches!(event.kind, EventKind::Remove(_)) || kind == OperationKind::Rename;
    removal && event.paths.iter().any(|path| path == root)
}
