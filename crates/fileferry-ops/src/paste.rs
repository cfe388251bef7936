//! Copy and move ("paste") of files and directory trees.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use fileferry_core::{ErrorKind, ItemError, OperationError, OperationKind, TransferMode};

use crate::arbiter::{ConflictQuery, Decision};
use crate::context::{RunContext, RunReport, StreamError};
use crate::inventory::{Inventory, InventoryEntry};
use crate::progress::{OperationComplete, ProgressTracker};

/// Opens the file a pasted entry is written to.
type OutputFn = fn(&Path) -> io::Result<File>;

fn create_output(target: &Path) -> io::Result<File> {
    File::create(target)
}

/// Copy or move `sources` into `destination`.
pub(crate) fn run_paste(
    ctx: &RunContext,
    sources: &[PathBuf],
    destination: &Path,
    mode: TransferMode,
) -> OperationComplete {
    paste_with_output(ctx, sources, destination, mode, create_output)
}

fn paste_with_output(
    ctx: &RunContext,
    sources: &[PathBuf],
    destination: &Path,
    mode: TransferMode,
    open_output: OutputFn,
) -> OperationComplete {
    let kind = match mode {
        TransferMode::Copy => OperationKind::Copy,
        TransferMode::Move => OperationKind::Move,
    };
    info!(%kind, sources = sources.len(), destination = %destination.display(), "paste started");

    let mut paste = Paste {
        ctx,
        destination,
        mode,
        report: RunReport::default(),
        overwrite: None,
        declined: Vec::new(),
        copied_bytes: 0,
        open_output,
    };
    let result = paste.execute(sources);
    let bytes = paste.copied_bytes;
    paste.report.into_complete(kind, bytes, result)
}

struct Paste<'a> {
    ctx: &'a RunContext,
    destination: &'a Path,
    mode: TransferMode,
    report: RunReport,
    /// The one overwrite answer of this run, once asked.
    overwrite: Option<Decision>,
    /// Source directories whose overwrite was declined.
    declined: Vec<PathBuf>,
    copied_bytes: u64,
    open_output: OutputFn,
}

impl Paste<'_> {
    fn execute(&mut self, sources: &[PathBuf]) -> Result<(), OperationError> {
        if let Err(err) = check_overlap(sources, self.destination) {
            self.ctx
                .ask(ConflictQuery::source_equals_destination(self.destination));
            return Err(err);
        }

        let inventory = Inventory::build(sources)?;
        if inventory.is_empty() {
            return Err(OperationError::SourceNotFound {
                path: sources[0].clone(),
            });
        }

        self.ctx
            .preflight_space(self.destination, inventory.total_bytes())?;

        fs::create_dir_all(self.destination).map_err(|source| {
            OperationError::DirectoryCreateFailed {
                path: self.destination.to_path_buf(),
                source,
            }
        })?;

        let kind = match self.mode {
            TransferMode::Copy => OperationKind::Copy,
            TransferMode::Move => OperationKind::Move,
        };
        let mut tracker = ProgressTracker::new(
            kind,
            inventory.len(),
            inventory.total_bytes(),
            self.ctx.config.progress_step_percent,
        );

        for entry in &inventory {
            self.ctx.check_cancelled()?;

            if self.is_declined(&entry.path) {
                self.ctx.report(tracker.skip_unit(entry.size));
                continue;
            }

            tracker.begin(&entry.path);
            let target = self.destination.join(&entry.relative);

            if fs::symlink_metadata(&target).is_ok() {
                if self.overwrite_decision(&target) == Decision::No {
                    debug!(path = %target.display(), "keeping existing entry");
                    if entry.is_dir() {
                        self.declined.push(entry.path.clone());
                    }
                    self.ctx.report(tracker.skip_unit(entry.size));
                    continue;
                }
                if let Err(err) = clear_target(&target) {
                    self.report
                        .fail(ItemError::new(&target, ErrorKind::DestinationReadOnly, err.to_string()));
                    self.ctx.report(tracker.skip_unit(entry.size));
                    continue;
                }
            }

            if entry.is_dir() {
                self.paste_directory(&target);
            } else {
                self.paste_file(entry, &target, &mut tracker)?;
            }
            self.ctx.report(tracker.complete_unit());
        }

        if self.mode == TransferMode::Move {
            self.remove_emptied_directories(&inventory);
        }

        info!(
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            bytes = self.copied_bytes,
            "paste finished"
        );
        Ok(())
    }

    fn is_declined(&self, path: &Path) -> bool {
        self.declined.iter().any(|dir| path.starts_with(dir))
    }

    /// Ask once, then reuse the answer for every later name clash.
    fn overwrite_decision(&mut self, target: &Path) -> Decision {
        if let Some(decision) = self.overwrite {
            return decision;
        }
        let decision = self.ctx.ask(ConflictQuery::overwrite(target));
        self.overwrite = Some(decision);
        decision
    }

    fn paste_directory(&mut self, target: &Path) {
        match fs::create_dir_all(target) {
            Ok(()) => {
                self.ctx.stamp_permissions(target);
                self.ctx.services.index.reindex(target);
                self.report.succeed();
            }
            Err(source) => self.report.fail(
                OperationError::DirectoryCreateFailed {
                    path: target.to_path_buf(),
                    source,
                }
                .into(),
            ),
        }
    }

    fn paste_file(
        &mut self,
        entry: &InventoryEntry,
        target: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<(), OperationError> {
        let source = match File::open(&entry.path) {
            Ok(f) => f,
            Err(err) => {
                self.report
                    .fail(ItemError::new(&entry.path, ErrorKind::SourceNotFound, err.to_string()));
                return Ok(());
            }
        };
        let output = match (self.open_output)(target) {
            Ok(f) => f,
            Err(err) => return self.write_failed(target, err),
        };

        let mut reader = BufReader::new(source);
        let mut writer = BufWriter::new(output);
        match self.ctx.stream(&mut reader, &mut writer, tracker, true) {
            Ok(bytes) => self.copied_bytes += bytes,
            Err(StreamError::Cancelled) => {
                drop(writer);
                remove_partial(target);
                return Err(OperationError::Cancelled);
            }
            Err(StreamError::Read(err)) => {
                drop(writer);
                remove_partial(target);
                self.report
                    .fail(ItemError::new(&entry.path, ErrorKind::SourceNotFound, err.to_string()));
                return Ok(());
            }
            Err(StreamError::Write(err)) => {
                drop(writer);
                remove_partial(target);
                return self.write_failed(target, err);
            }
        }
        drop(writer);

        self.ctx.stamp_permissions(target);
        self.ctx.services.index.reindex(target);

        if self.mode == TransferMode::Move {
            if let Err(err) = fs::remove_file(&entry.path) {
                self.report.fail(ItemError::new(
                    &entry.path,
                    ErrorKind::DestinationReadOnly,
                    format!("copied but source not removed: {err}"),
                ));
                return Ok(());
            }
            self.ctx.services.index.remove(&entry.path);
        }

        self.report.succeed();
        Ok(())
    }

    /// A full device ends the run; anything else fails only this entry.
    fn write_failed(&mut self, target: &Path, err: io::Error) -> Result<(), OperationError> {
        match OperationError::io(target, err) {
            OperationError::InsufficientSpace { .. } => {
                let available = self
                    .ctx
                    .services
                    .space
                    .available_bytes(self.destination)
                    .unwrap_or(0);
                let err = OperationError::InsufficientSpace {
                    path: self.destination.to_path_buf(),
                    required: 0,
                    available,
                };
                Err(self.ctx.report_no_space(self.destination, err))
            }
            other => {
                self.report.fail(other.into());
                Ok(())
            }
        }
    }

    /// Remove source directories deepest first. Directories still holding
    /// skipped or failed entries stay.
    fn remove_emptied_directories(&mut self, inventory: &Inventory) {
        for entry in inventory.iter().rev().filter(|e| e.is_dir()) {
            if self.is_declined(&entry.path) {
                continue;
            }
            match fs::remove_dir(&entry.path) {
                Ok(()) => self.ctx.services.index.remove(&entry.path),
                Err(err) => debug!(path = %entry.path.display(), %err, "source directory kept"),
            }
        }
    }
}

/// Reject destinations that are a source, lie inside one, or are the
/// directory the sources come from.
fn check_overlap(sources: &[PathBuf], destination: &Path) -> Result<(), OperationError> {
    let destination_real = resolve(destination);
    for source in sources {
        let source_real = resolve(source);
        let same_parent = source_real.parent() == Some(destination_real.as_path());
        if destination_real.starts_with(&source_real) || same_parent {
            return Err(OperationError::SourceEqualsDestination {
                source_path: source.clone(),
                destination: destination.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Absolute, symlink-free form of `path`. Components that do not exist yet
/// are appended to the canonical form of the nearest existing ancestor.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Remove whatever already sits at `target`.
fn clear_target(target: &Path) -> io::Result<()> {
    if fs::symlink_metadata(target)?.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    }
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        debug!(path = %path.display(), %err, "partial file not removed");
    }
}
