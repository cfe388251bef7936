//! Permanent deletion of files and directory trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, info};

use fileferry_core::{DeleteConfirmation, OperationError, OperationKind};

use crate::arbiter::{ConflictQuery, Decision};
use crate::context::{RunContext, RunReport};
use crate::inventory::Inventory;
use crate::progress::{OperationComplete, ProgressTracker};
use crate::services::ThumbnailKey;

/// Delete `targets` depth-first after an optional confirmation.
pub(crate) fn run_delete(
    ctx: &RunContext,
    targets: &[PathBuf],
    confirmation: DeleteConfirmation,
) -> OperationComplete {
    info!(targets = targets.len(), "delete started");

    let mut delete = Delete {
        ctx,
        report: RunReport::default(),
        saw_directory: false,
        deleted_files: Vec::new(),
        deleted_bytes: 0,
    };
    let result = delete.execute(targets, confirmation);
    let bytes = delete.deleted_bytes;
    delete.report.into_complete(OperationKind::Delete, bytes, result)
}

struct Delete<'a> {
    ctx: &'a RunContext,
    report: RunReport,
    saw_directory: bool,
    deleted_files: Vec<PathBuf>,
    deleted_bytes: u64,
}

impl Delete<'_> {
    fn execute(
        &mut self,
        targets: &[PathBuf],
        confirmation: DeleteConfirmation,
    ) -> Result<(), OperationError> {
        if confirmation == DeleteConfirmation::Prompt
            && self.ctx.ask(ConflictQuery::confirm_delete(targets)) == Decision::No
        {
            debug!("delete declined");
            return Err(OperationError::Cancelled);
        }

        let inventory = Inventory::build(targets)?;
        if inventory.is_empty() {
            return Err(OperationError::SourceNotFound {
                path: targets[0].clone(),
            });
        }

        let mut tracker = ProgressTracker::new(
            OperationKind::Delete,
            inventory.len(),
            0,
            self.ctx.config.progress_step_percent,
        );

        let result = targets
            .iter()
            .try_for_each(|target| self.delete_path(target, &mut tracker));

        // The index is synced for whatever was removed, cancelled or not.
        self.sync_index(targets);

        info!(
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            "delete finished"
        );
        result
    }

    fn delete_path(
        &mut self,
        path: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<(), OperationError> {
        self.ctx.check_cancelled()?;

        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(err) => {
                debug!(path = %path.display(), %err, "already gone");
                return Ok(());
            }
        };
        tracker.begin(path);

        if metadata.is_dir() {
            self.saw_directory = true;
            let mut children: Vec<PathBuf> = match fs::read_dir(path) {
                Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
                Err(source) => {
                    self.report.fail(
                        OperationError::DeleteFailed {
                            path: path.to_path_buf(),
                            source,
                        }
                        .into(),
                    );
                    return Ok(());
                }
            };
            children.sort();
            for child in &children {
                self.delete_path(child, tracker)?;
            }

            match fs::remove_dir(path) {
                Ok(()) => self.report.succeed(),
                Err(source) => self.report.fail(
                    OperationError::DeleteFailed {
                        path: path.to_path_buf(),
                        source,
                    }
                    .into(),
                ),
            }
        } else {
            let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
            match fs::remove_file(path) {
                Ok(()) => {
                    self.ctx
                        .services
                        .thumbnails
                        .purge(&ThumbnailKey::new(path, modified));
                    self.deleted_bytes += metadata.len();
                    self.deleted_files.push(path.to_path_buf());
                    self.report.succeed();
                }
                Err(source) => self.report.fail(
                    OperationError::DeleteFailed {
                        path: path.to_path_buf(),
                        source,
                    }
                    .into(),
                ),
            }
        }

        self.ctx.report(tracker.complete_unit());
        Ok(())
    }

    /// One subtree rescan when directories were involved, otherwise one
    /// removal per deleted file.
    fn sync_index(&self, targets: &[PathBuf]) {
        let index = &self.ctx.services.index;
        if self.saw_directory {
            if let Some(parent) = targets.first().and_then(|t| t.parent()) {
                index.rescan_subtree(parent);
            }
        } else {
            for path in &self.deleted_files {
                index.remove(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestRun;
    use crate::progress::Outcome;
    use crate::services::{DiskThumbnailCache, MediaIndex, Services, ThumbnailCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingIndex {
        rescans: AtomicUsize,
        removes: AtomicUsize,
    }

    impl MediaIndex for CountingIndex {
        fn reindex(&self, _path: &Path) {}
        fn rescan_subtree(&self, _dir: &Path) {
            self.rescans.fetch_add(1, Ordering::SeqCst);
        }
        fn remove(&self, _path: &Path) {
            self.removes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_delete_tree_rescans_once() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("photos");
        fs::create_dir_all(root.join("2024/summer")).unwrap();
        fs::write(root.join("2024/a.jpg"), "a").unwrap();
        fs::write(root.join("2024/summer/b.jpg"), "bb").unwrap();

        let index = Arc::new(CountingIndex::default());
        let run = TestRun::new(Services::default().with_index(index.clone()), Decision::Yes);

        let done = run_delete(&run.ctx, &[root.clone()], DeleteConfirmation::Prompt);

        assert!(done.is_success());
        assert_eq!(done.succeeded, 5);
        assert_eq!(done.bytes_processed, 3);
        assert!(!root.exists());
        assert_eq!(index.rescans.load(Ordering::SeqCst), 1);
        assert_eq!(index.removes.load(Ordering::SeqCst), 0);

        let events = run.finish();
        assert_eq!(TestRun::conflicts(&events), 1);
    }

    #[test]
    fn test_delete_files_removes_each_from_index() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let index = Arc::new(CountingIndex::default());
        let run = TestRun::new(Services::default().with_index(index.clone()), Decision::Yes);

        let done = run_delete(&run.ctx, &[a.clone(), b.clone()], DeleteConfirmation::Skip);

        assert!(done.is_success());
        assert!(!a.exists() && !b.exists());
        assert_eq!(index.rescans.load(Ordering::SeqCst), 0);
        assert_eq!(index.removes.load(Ordering::SeqCst), 2);

        // No confirmation was asked for.
        let events = run.finish();
        assert_eq!(TestRun::conflicts(&events), 0);
    }

    #[test]
    fn test_declined_confirmation_keeps_everything() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("keep.txt");
        fs::write(&file, "x").unwrap();

        let run = TestRun::new(Services::default(), Decision::No);
        let done = run_delete(&run.ctx, &[file.clone()], DeleteConfirmation::Prompt);

        assert_eq!(done.outcome, Outcome::Cancelled);
        assert!(file.exists());
        run.finish();
    }

    #[test]
    fn test_purges_thumbnails() {
        let temp = TempDir::new().unwrap();
        let thumbs = temp.path().join("thumbs");
        fs::create_dir_all(&thumbs).unwrap();
        let photo = temp.path().join("cat.jpg");
        fs::write(&photo, "meow").unwrap();

        let cache = DiskThumbnailCache::new(&thumbs);
        let modified = fs::metadata(&photo).unwrap().modified().unwrap();
        let artifact = cache.artifact_path(&ThumbnailKey::new(&photo, modified));
        fs::write(&artifact, "thumb").unwrap();

        let cache: Arc<dyn ThumbnailCache> = Arc::new(cache);
        let run = TestRun::new(Services::default().with_thumbnails(cache), Decision::Yes);
        let done = run_delete(&run.ctx, &[photo], DeleteConfirmation::Skip);

        assert!(done.is_success());
        assert!(!artifact.exists());
        run.finish();
    }

    #[test]
    fn test_cancelled_delete_still_syncs_index() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("f"), "f").unwrap();

        let index = Arc::new(CountingIndex::default());
        let run = TestRun::new(Services::default().with_index(index.clone()), Decision::Yes);
        run.cancel.cancel();

        let done = run_delete(&run.ctx, &[dir.clone()], DeleteConfirmation::Skip);

        assert_eq!(done.outcome, Outcome::Cancelled);
        assert!(dir.join("f").exists());
        assert_eq!(index.removes.load(Ordering::SeqCst), 0);
        run.finish();
    }
}
