//! Progress reporting types for file operations.

use std::path::Path;

use serde::{Deserialize, Serialize};

use fileferry_core::{ErrorKind, ItemError, OperationKind};

/// Snapshot of a running operation, pushed to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// The type of operation.
    pub kind: OperationKind,
    /// Dialog title, e.g. "Copying".
    pub title: String,
    /// Bytes streamed so far.
    pub processed_bytes: u64,
    /// Regular-file bytes in the inventory.
    pub total_bytes: u64,
    /// Units finished or skipped so far.
    pub units_done: usize,
    /// Units in the inventory.
    pub units_total: usize,
    /// Name of the entry being worked on.
    pub current: Option<String>,
}

impl ProgressState {
    /// Get the progress as a percentage (0.0 to 100.0).
    ///
    /// Every unit weighs one plus its byte length, so empty directories
    /// still move the bar.
    pub fn percentage(&self) -> f64 {
        let total = self.total_bytes + self.units_total as u64;
        if total == 0 {
            return 0.0;
        }
        let done = self.processed_bytes + self.units_done as u64;
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Worker-owned progress counters with rate limiting.
///
/// A snapshot is due whenever the aggregate percentage has moved by at
/// least the configured step since the last one.
#[derive(Debug)]
pub struct ProgressTracker {
    state: ProgressState,
    step: f64,
    last_reported: Option<f64>,
}

impl ProgressTracker {
    /// Create a tracker for a run of `units_total` units and `total_bytes` bytes.
    pub fn new(
        kind: OperationKind,
        units_total: usize,
        total_bytes: u64,
        step_percent: u8,
    ) -> Self {
        Self {
            state: ProgressState {
                kind,
                title: title_for(kind).to_string(),
                processed_bytes: 0,
                total_bytes,
                units_done: 0,
                units_total,
                current: None,
            },
            step: f64::from(step_percent),
            last_reported: None,
        }
    }

    /// Name the entry about to be processed.
    pub fn begin(&mut self, path: &Path) {
        self.state.current = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
    }

    /// Count streamed bytes. Returns a snapshot if one is due.
    pub fn add_bytes(&mut self, bytes: u64) -> Option<ProgressState> {
        self.state.processed_bytes += bytes;
        self.due()
    }

    /// Count a finished unit. Returns a snapshot if one is due.
    pub fn complete_unit(&mut self) -> Option<ProgressState> {
        self.state.units_done = (self.state.units_done + 1).min(self.state.units_total);
        self.due()
    }

    /// Count a unit that will not be processed, with the bytes it would
    /// have streamed, so the bar still reaches the end.
    pub fn skip_unit(&mut self, bytes: u64) -> Option<ProgressState> {
        self.state.processed_bytes += bytes;
        self.complete_unit()
    }

    /// Take a snapshot unconditionally.
    pub fn snapshot(&mut self) -> ProgressState {
        self.last_reported = Some(self.state.percentage());
        self.state.clone()
    }

    /// Read the counters without marking a report.
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    fn due(&mut self) -> Option<ProgressState> {
        let now = self.state.percentage();
        let due = match self.last_reported {
            None => true,
            Some(last) => now - last >= self.step,
        };
        due.then(|| self.snapshot())
    }
}

fn title_for(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Copy => "Copying",
        OperationKind::Move => "Moving",
        OperationKind::Delete => "Deleting",
        OperationKind::Zip => "Compressing",
        OperationKind::Unzip => "Extracting",
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Every entry was visited; item errors may still be present.
    Completed,
    /// The cancellation flag was observed, or the user declined.
    Cancelled,
    /// A run-scoped error ended the run.
    Failed(ErrorKind),
}

/// Terminal notification of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationComplete {
    /// The type of operation.
    pub kind: OperationKind,
    /// How the run ended.
    pub outcome: Outcome,
    /// Number of items successfully processed.
    pub succeeded: usize,
    /// Number of items that failed.
    pub failed: usize,
    /// Total bytes processed.
    pub bytes_processed: u64,
    /// Item errors, plus the run error when the run failed.
    pub errors: Vec<ItemError>,
}

impl OperationComplete {
    /// Check if the operation was fully successful.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Completed && self.failed == 0
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Delete => "Deleted",
            OperationKind::Zip => "Compressed",
            OperationKind::Unzip => "Extracted",
        };

        match self.outcome {
            Outcome::Completed if self.failed == 0 => {
                format!("{} {} items", action, self.succeeded)
            }
            Outcome::Completed => format!(
                "{} {} items, {} failed",
                action, self.succeeded, self.failed
            ),
            Outcome::Cancelled => format!(
                "{} cancelled after {} items",
                self.kind, self.succeeded
            ),
            Outcome::Failed(kind) => format!("{} failed: {}", self.kind, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_percentage_counts_units_and_bytes() {
        let mut tracker = ProgressTracker::new(OperationKind::Copy, 2, 98, 10);
        tracker.add_bytes(49);
        assert!((tracker.state().percentage() - 49.0).abs() < 1e-9);
        tracker.complete_unit();
        tracker.add_bytes(49);
        tracker.complete_unit();
        assert_eq!(tracker.state().percentage(), 100.0);
    }

    #[test]
    fn test_reports_first_then_every_step() {
        let mut tracker = ProgressTracker::new(OperationKind::Zip, 1, 999, 10);

        assert!(tracker.add_bytes(1).is_some());
        assert!(tracker.add_bytes(50).is_none());
        assert!(tracker.add_bytes(60).is_some());
        assert!(tracker.add_bytes(10).is_none());
    }

    #[test]
    fn test_progress_never_exceeds_hundred() {
        // The file grew after the inventory was taken.
        let mut tracker = ProgressTracker::new(OperationKind::Copy, 1, 10, 10);
        tracker.add_bytes(50);
        tracker.complete_unit();
        tracker.complete_unit();
        assert_eq!(tracker.state().percentage(), 100.0);
        assert_eq!(tracker.state().units_done, 1);
    }

    #[test]
    fn test_empty_run_percentage() {
        let tracker = ProgressTracker::new(OperationKind::Delete, 0, 0, 10);
        assert_eq!(tracker.state().percentage(), 0.0);
        assert_eq!(tracker.state().title, "Deleting");
    }

    #[test]
    fn test_summary() {
        let done = OperationComplete {
            kind: OperationKind::Move,
            outcome: Outcome::Completed,
            succeeded: 3,
            failed: 1,
            bytes_processed: 10,
            errors: vec![ItemError::new(
                PathBuf::from("/x"),
                ErrorKind::DeleteFailed,
                "busy",
            )],
        };
        assert!(!done.is_success());
        assert_eq!(done.summary(), "Moved 3 items, 1 failed");

        let failed = OperationComplete {
            outcome: Outcome::Failed(ErrorKind::InsufficientSpace),
            ..done
        };
        assert_eq!(failed.summary(), "Move failed: Insufficient space");
    }
}
