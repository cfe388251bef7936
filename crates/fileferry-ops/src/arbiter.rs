//! Blocking Yes/No questions from the worker thread to the UI.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a conflict query is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// The destination entry already exists. Yes replaces it.
    Overwrite,
    /// The destination lacks free space. Either answer ends the run.
    InsufficientSpace,
    /// The destination is a source or lies inside one. Either answer ends the run.
    SourceEqualsDestination,
    /// "Are you sure" before a delete. No ends the run.
    ConfirmDelete,
}

/// A question the worker needs answered before it can continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictQuery {
    pub kind: ConflictKind,
    pub title: String,
    pub message: String,
    /// The path the question is about, if any.
    pub path: Option<PathBuf>,
}

impl ConflictQuery {
    /// Ask whether an existing destination may be replaced.
    pub fn overwrite(existing: &Path) -> Self {
        Self {
            kind: ConflictKind::Overwrite,
            title: "Already exists".to_string(),
            message: format!("\"{}\" already exists. Replace it?", display_name(existing)),
            path: Some(existing.to_path_buf()),
        }
    }

    /// Tell the user the destination is too full.
    pub fn insufficient_space(destination: &Path, required: u64, available: u64) -> Self {
        Self {
            kind: ConflictKind::InsufficientSpace,
            title: "Not enough space".to_string(),
            message: format!(
                "{} needs {required} bytes but only {available} bytes are free.",
                destination.display()
            ),
            path: Some(destination.to_path_buf()),
        }
    }

    /// Tell the user the destination overlaps a source.
    pub fn source_equals_destination(destination: &Path) -> Self {
        Self {
            kind: ConflictKind::SourceEqualsDestination,
            title: "Cannot paste here".to_string(),
            message: "The destination folder is the same as, or inside, the source folder."
                .to_string(),
            path: Some(destination.to_path_buf()),
        }
    }

    /// Ask for confirmation before deleting `targets`.
    pub fn confirm_delete(targets: &[PathBuf]) -> Self {
        let message = match targets {
            [single] => format!("Delete \"{}\"?", display_name(single)),
            many => format!("Delete {} items?", many.len()),
        };
        Self {
            kind: ConflictKind::ConfirmDelete,
            title: "Delete".to_string(),
            message,
            path: targets.first().cloned(),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Answer to a [`ConflictQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Yes,
    No,
}

#[derive(Debug, Default)]
struct Slot {
    pending: bool,
    decision: Option<Decision>,
    closed: bool,
}

/// Single-slot rendezvous between the worker and the UI.
///
/// The worker posts one query and blocks without a timeout until exactly
/// one decision is written. A UI that never answers leaves the worker
/// waiting; closing the arbiter (on cancel) ends the wait with
/// [`Decision::No`] and answers every later query the same way.
#[derive(Debug, Default)]
pub struct ConflictArbiter {
    slot: Mutex<Slot>,
    answered: Condvar,
}

impl ConflictArbiter {
    /// Create an idle arbiter.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post `query` through `deliver` and wait for the decision.
    ///
    /// `deliver` returns false when nobody is listening any more; the
    /// question is then answered with [`Decision::No`] instead of waiting
    /// forever.
    pub(crate) fn ask(
        &self,
        query: ConflictQuery,
        deliver: impl FnOnce(ConflictQuery) -> bool,
    ) -> Decision {
        {
            let mut slot = self.lock();
            if slot.closed {
                return Decision::No;
            }
            slot.pending = true;
            slot.decision = None;
        }

        let kind = query.kind;
        debug!(?kind, message = %query.message, "waiting for decision");
        if !deliver(query) {
            warn!(?kind, "no listener for conflict query, answering No");
            let mut slot = self.lock();
            slot.pending = false;
            return Decision::No;
        }

        let mut slot = self.lock();
        while slot.decision.is_none() && !slot.closed {
            slot = self
                .answered
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.pending = false;
        let decision = slot.decision.take().unwrap_or(Decision::No);
        debug!(?kind, ?decision, "decision received");
        decision
    }

    /// Write the decision for the outstanding query.
    ///
    /// Returns false when no query is waiting or it was already answered.
    pub fn resolve(&self, decision: Decision) -> bool {
        let mut slot = self.lock();
        if !slot.pending || slot.decision.is_some() {
            return false;
        }
        slot.decision = Some(decision);
        self.answered.notify_all();
        true
    }

    /// Answer a waiting query with No and refuse all later ones.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        self.answered.notify_all();
    }

    /// Check whether a query is waiting for its decision.
    pub fn is_pending(&self) -> bool {
        let slot = self.lock();
        slot.pending && slot.decision.is_none()
    }
}

/// UI-side handle for answering queries.
#[derive(Debug, Clone)]
pub struct ConflictResponder {
    arbiter: Arc<ConflictArbiter>,
}

impl ConflictResponder {
    pub(crate) fn new(arbiter: Arc<ConflictArbiter>) -> Self {
        Self { arbiter }
    }

    /// Deliver the decision for the outstanding query.
    pub fn answer(&self, decision: Decision) -> bool {
        self.arbiter.resolve(decision)
    }

    /// Check whether the worker is waiting for an answer.
    pub fn is_waiting(&self) -> bool {
        self.arbiter.is_pending()
    }
}
