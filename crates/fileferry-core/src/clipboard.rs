//! Cut/copy clipboard owned by the coordinating front end.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::request::{OperationRequest, TransferMode};

/// Pending cut or copy selection.
///
/// The coordinator owns one of these and turns it into a paste request;
/// operations never read it directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clipboard {
    mode: TransferMode,
    sources: Vec<PathBuf>,
    source_parent: Option<PathBuf>,
}

impl Clipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `paths` for a later copy-paste.
    pub fn copy(&mut self, paths: Vec<PathBuf>) {
        self.fill(TransferMode::Copy, paths);
    }

    /// Remember `paths` for a later move-paste.
    pub fn cut(&mut self, paths: Vec<PathBuf>) {
        self.fill(TransferMode::Move, paths);
    }

    fn fill(&mut self, mode: TransferMode, paths: Vec<PathBuf>) {
        self.source_parent = paths
            .first()
            .filter(|p| p.exists())
            .and_then(|p| p.parent())
            .map(Path::to_path_buf);
        self.mode = mode;
        self.sources = paths;
    }

    /// Forget the current selection.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Check whether there is anything to paste.
    pub fn can_paste(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Check whether the selection was cut rather than copied.
    pub fn is_cut(&self) -> bool {
        self.mode == TransferMode::Move
    }

    /// The selected paths, in selection order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Parent directory of the selection, when it still exists.
    pub fn source_parent(&self) -> Option<&Path> {
        self.source_parent.as_deref()
    }

    /// Build the paste request for `destination`.
    pub fn paste_request(&self, destination: impl Into<PathBuf>) -> Option<OperationRequest> {
        if !self.can_paste() {
            return None;
        }
        Some(OperationRequest::Paste {
            sources: self.sources.clone(),
            destination: destination.into(),
            mode: self.mode,
        })
    }

    /// Update the selection after a paste finished.
    ///
    /// Moved sources are gone, so a completed cut empties the clipboard;
    /// copied sources can be pasted again.
    pub fn on_paste_finished(&mut self, completed: bool) {
        if completed && self.is_cut() {
            self.clear();
        }
    }
}
