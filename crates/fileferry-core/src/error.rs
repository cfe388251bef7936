//! Error types for file operations.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification shared by run-level errors and item-level failures.
///
/// This is also the key of the terminal notification sent to the UI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum ErrorKind {
    #[strum(to_string = "Source not found")]
    SourceNotFound,
    #[strum(to_string = "Source and destination are the same")]
    SourceEqualsDestination,
    #[strum(to_string = "Insufficient space")]
    InsufficientSpace,
    #[strum(to_string = "Destination is read-only")]
    DestinationReadOnly,
    #[strum(to_string = "Delete failed")]
    DeleteFailed,
    #[strum(to_string = "Archive read failed")]
    ArchiveReadFailed,
    #[strum(to_string = "Directory could not be created")]
    DirectoryCreateFailed,
    #[strum(to_string = "Cancelled")]
    Cancelled,
}

/// Errors that end a whole operation run.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Nothing to operate on.
    #[error("Source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Destination is a source, lies inside one, or is the sources' own parent.
    #[error("Destination {destination} is the same as or inside source {source_path}")]
    SourceEqualsDestination {
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// Not enough free space at the destination.
    #[error("Not enough space at {path}: {required} bytes needed, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Destination cannot be written.
    #[error("Cannot write to {path}: {source}")]
    DestinationReadOnly {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A path could not be removed.
    #[error("Failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive could not be opened or one of its headers is unusable.
    #[error("Failed to read archive {path}: {message}")]
    ArchiveReadFailed { path: PathBuf, message: String },

    /// A required directory could not be created.
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run observed its cancellation flag.
    #[error("Operation cancelled")]
    Cancelled,

    /// The worker thread could not be started.
    #[error("Failed to start worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),
}

impl OperationError {
    /// Classify a raw I/O error hit while writing to `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if is_out_of_space(&source) {
            return Self::InsufficientSpace {
                path,
                required: 0,
                available: 0,
            };
        }
        match source.kind() {
            io::ErrorKind::NotFound => Self::SourceNotFound { path },
            _ => Self::DestinationReadOnly { path, source },
        }
    }

    /// The taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            Self::SourceEqualsDestination { .. } => ErrorKind::SourceEqualsDestination,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::DestinationReadOnly { .. } | Self::WorkerSpawn(_) => {
                ErrorKind::DestinationReadOnly
            }
            Self::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Self::ArchiveReadFailed { .. } => ErrorKind::ArchiveReadFailed,
            Self::DirectoryCreateFailed { .. } => ErrorKind::DirectoryCreateFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Check whether an I/O error means the device is full.
pub fn is_out_of_space(err: &io::Error) -> bool {
    // ENOSPC on Linux and the BSDs.
    err.kind() == io::ErrorKind::StorageFull || err.raw_os_error() == Some(28)
}

/// A failure scoped to one inventory entry; the run continues past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    /// The path that caused the error.
    pub path: PathBuf,
    /// What went wrong.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
}

impl ItemError {
    /// Create a new item error.
    pub fn new(path: impl Into<PathBuf>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl From<OperationError> for ItemError {
    fn from(err: OperationError) -> Self {
        let path = match &err {
            OperationError::SourceNotFound { path }
            | OperationError::InsufficientSpace { path, .. }
            | OperationError::DestinationReadOnly { path, .. }
            | OperationError::DeleteFailed { path, .. }
            | OperationError::ArchiveReadFailed { path, .. }
            | OperationError::DirectoryCreateFailed { path, .. } => path.clone(),
            OperationError::SourceEqualsDestination { destination, .. } => destination.clone(),
            OperationError::Cancelled | OperationError::WorkerSpawn(_) => PathBuf::new(),
        };
        Self::new(path, err.kind(), err.to_string())
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_io_classification() {
        let err = OperationError::io(
            "/dest/file",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::DestinationReadOnly);

        let err = OperationError::io("/dest/file", io::Error::from_raw_os_error(28));
        assert_eq!(err.kind(), ErrorKind::InsufficientSpace);

        let err = OperationError::io("/src/file", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);
    }

    #[test]
    fn test_item_error_from_operation_error() {
        let item: ItemError = OperationError::ArchiveReadFailed {
            path: PathBuf::from("/a.zip"),
            message: "bad header".into(),
        }
        .into();
        assert_eq!(item.kind, ErrorKind::ArchiveReadFailed);
        assert_eq!(item.path, PathBuf::from("/a.zip"));
        assert!(item.message.contains("bad header"));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::InsufficientSpace.to_string(), "Insufficient space");
        assert_eq!(ErrorKind::DeleteFailed.as_ref(), "Delete failed");
    }
}
