//! Operation request types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Whether a paste keeps or removes its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

/// Whether a delete asks "are you sure" first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeleteConfirmation {
    /// Ask once before removing anything.
    #[default]
    Prompt,
    /// The caller already confirmed.
    Skip,
}

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Zip,
    Unzip,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::Zip => write!(f, "Compress"),
            Self::Unzip => write!(f, "Extract"),
        }
    }
}

/// A file operation to be executed. Immutable once started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationRequest {
    /// Copy or move sources into a destination directory.
    Paste {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        mode: TransferMode,
    },
    /// Delete files and directory trees.
    Delete {
        targets: Vec<PathBuf>,
        confirmation: DeleteConfirmation,
    },
    /// Compress sources into `destination/archive_name`.
    Zip {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        archive_name: String,
    },
    /// Extract an archive into a directory named after it inside `destination`.
    Unzip { archive: PathBuf, destination: PathBuf },
}

impl OperationRequest {
    /// Create a copy request.
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Paste {
            sources,
            destination: destination.into(),
            mode: TransferMode::Copy,
        }
    }

    /// Create a move request.
    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Paste {
            sources,
            destination: destination.into(),
            mode: TransferMode::Move,
        }
    }

    /// Create a delete request that prompts for confirmation.
    pub fn delete(targets: Vec<PathBuf>) -> Self {
        Self::Delete {
            targets,
            confirmation: DeleteConfirmation::Prompt,
        }
    }

    /// Create a zip request.
    pub fn zip(
        sources: Vec<PathBuf>,
        destination: impl Into<PathBuf>,
        archive_name: impl Into<String>,
    ) -> Self {
        Self::Zip {
            sources,
            destination: destination.into(),
            archive_name: archive_name.into(),
        }
    }

    /// Create an unzip request.
    pub fn unzip(archive: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Unzip {
            archive: archive.into(),
            destination: destination.into(),
        }
    }

    /// The kind of this request.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Paste {
                mode: TransferMode::Copy,
                ..
            } => OperationKind::Copy,
            Self::Paste {
                mode: TransferMode::Move,
                ..
            } => OperationKind::Move,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Zip { .. } => OperationKind::Zip,
            Self::Unzip { .. } => OperationKind::Unzip,
        }
    }

    /// The ordered source paths of this request.
    pub fn sources(&self) -> &[PathBuf] {
        match self {
            Self::Paste { sources, .. } | Self::Zip { sources, .. } => sources,
            Self::Delete { targets, .. } => targets,
            Self::Unzip { archive, .. } => std::slice::from_ref(archive),
        }
    }

    /// The directory this request writes into.
    ///
    /// For a delete this is the parent of the first target.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Paste { destination, .. }
            | Self::Zip { destination, .. }
            | Self::Unzip { destination, .. } => Some(destination),
            Self::Delete { targets, .. } => targets.first().and_then(|t| t.parent()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind() {
        let req = OperationRequest::move_to(vec![PathBuf::from("/a/b")], "/c");
        assert_eq!(req.kind(), OperationKind::Move);
        assert_eq!(req.destination(), Some(Path::new("/c")));

        let req = OperationRequest::delete(vec![PathBuf::from("/a/b"), PathBuf::from("/a/c")]);
        assert_eq!(req.kind(), OperationKind::Delete);
        assert_eq!(req.destination(), Some(Path::new("/a")));
        assert_eq!(req.sources().len(), 2);
    }

    #[test]
    fn test_unzip_sources() {
        let req = OperationRequest::unzip("/a/photos.zip", "/a");
        assert_eq!(req.sources(), &[PathBuf::from("/a/photos.zip")]);
        assert_eq!(req.kind().to_string(), "Extract");
    }
}
