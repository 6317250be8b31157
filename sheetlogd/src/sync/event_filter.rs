use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind};
use thiserror::Error;

/// What happened to a path, reduced to the distinctions the filter needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Write,
    Rename,
    Remove,
    /// Permissions or timestamps changed (inotify `IN_ATTRIB`).
    Chmod,
    /// A writer closed the file (inotify `IN_CLOSE_WRITE`).
    CloseWrite,
    Other,
}

impl From<&EventKind> for OperationKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => OperationKind::Create,
            EventKind::Modify(ModifyKind::Metadata(_)) => OperationKind::Chmod,
            EventKind::Modify(ModifyKind::Name(_)) => OperationKind::Rename,
            EventKind::Modify(_) => OperationKind::Write,
            EventKind::Remove(_) => OperationKind::Remove,
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => OperationKind::CloseWrite,
            _ => OperationKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemEvent {
    pub path: PathBuf,
    pub kind: OperationKind,
    pub timestamp: SystemTime,
}

impl FilesystemEvent {
    pub fn new(path: impl Into<PathBuf>, kind: OperationKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: SystemTime::now(),
        }
    }

    /// One event per affected path.
    pub fn from_notify(event: Event) -> Vec<Self> {
        let kind = OperationKind::from(&event.kind);
        let timestamp = SystemTime::now();
        event
            .paths
            .into_iter()
            .map(|path| Self {
                path,
                kind,
                timestamp,
            })
            .collect()
    }

    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// The operation that marks a download as finished and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalKind {
    #[default]
    Metadata,
    CloseWrite,
}

impl TerminalKind {
    fn operation(self) -> OperationKind {
        match self {
            TerminalKind::Metadata => OperationKind::Chmod,
            TerminalKind::CloseWrite => OperationKind::CloseWrite,
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown terminal event kind `{0}` (expected `metadata` or `close-write`)")]
pub struct ParseTerminalKindError(String);

impl FromStr for TerminalKind {
    type Err = ParseTerminalKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metadata" | "chmod" | "attrib" => Ok(TerminalKind::Metadata),
            "close-write" | "close_write" => Ok(TerminalKind::CloseWrite),
            other => Err(ParseTerminalKindError(other.to_string())),
        }
    }
}

/// Decides whether an event means "a download with the watched extension
/// just finished". Creation and in-progress writes fire many times during a
/// download and never match.
#[derive(Debug, Clone)]
pub struct EventFilter {
    extension: String,
    terminal: TerminalKind,
}

impl EventFilter {
    pub fn new(extension: impl Into<String>, terminal: TerminalKind) -> Self {
        Self {
            extension: extension.into(),
            terminal,
        }
    }

    pub fn matches(&self, event: &FilesystemEvent) -> bool {
        event.kind == self.terminal.operation()
            && event
                .path
                .extension()
                .is_some_and(|ext| ext == self.extension.as_str())
    }
}
