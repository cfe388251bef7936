//! Compression of files and directory trees into a zip archive.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use fileferry_core::{ErrorKind, ItemError, OperationError, OperationKind};

use crate::arbiter::{ConflictQuery, Decision};
use crate::context::{RunContext, RunReport, StreamError};
use crate::inventory::{Inventory, InventoryEntry};
use crate::progress::{OperationComplete, ProgressTracker};

/// Compress `sources` into `destination/archive_name`.
pub(crate) fn run_zip(
    ctx: &RunContext,
    sources: &[PathBuf],
    destination: &Path,
    archive_name: &str,
) -> OperationComplete {
    zip_with_output(ctx, sources, destination, archive_name, |path: &Path| {
        File::create(path)
    })
}

fn zip_with_output<W, F>(
    ctx: &RunContext,
    sources: &[PathBuf],
    destination: &Path,
    archive_name: &str,
    open_output: F,
) -> OperationComplete
where
    W: Write + Seek,
    F: FnOnce(&Path) -> io::Result<W>,
{
    let archive = destination.join(archive_name);
    info!(sources = sources.len(), archive = %archive.display(), "zip started");

    let mut zip = Zip {
        ctx,
        destination,
        archive: &archive,
        report: RunReport::default(),
        written_bytes: 0,
        created: false,
    };
    let result = zip.execute(sources, open_output);
    if result.is_err() && zip.created {
        remove_partial(&archive);
    }
    let bytes = zip.written_bytes;
    zip.report.into_complete(OperationKind::Zip, bytes, result)
}

struct Zip<'a> {
    ctx: &'a RunContext,
    destination: &'a Path,
    archive: &'a Path,
    report: RunReport,
    written_bytes: u64,
    /// Whether this run created the archive file.
    created: bool,
}

impl Zip<'_> {
    fn execute<W, F>(&mut self, sources: &[PathBuf], open_output: F) -> Result<(), OperationError>
    where
        W: Write + Seek,
        F: FnOnce(&Path) -> io::Result<W>,
    {
        let inventory = Inventory::build(sources)?;
        if inventory.is_empty() {
            return Err(OperationError::SourceNotFound {
                path: sources[0].clone(),
            });
        }

        if fs::symlink_metadata(self.archive).is_ok() {
            if self.ctx.ask(ConflictQuery::overwrite(self.archive)) == Decision::No {
                debug!("existing archive kept");
                return Err(OperationError::Cancelled);
            }
            fs::remove_file(self.archive)
                .map_err(|err| OperationError::io(self.archive, err))?;
        }

        self.ctx
            .preflight_space(self.destination, inventory.total_bytes())?;

        fs::create_dir_all(self.destination).map_err(|source| {
            OperationError::DirectoryCreateFailed {
                path: self.destination.to_path_buf(),
                source,
            }
        })?;
        let file = open_output(self.archive).map_err(|err| self.classify(err))?;
        self.created = true;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(self.ctx.config.canonical_mode);

        let mut tracker = ProgressTracker::new(
            OperationKind::Zip,
            inventory.len(),
            inventory.total_bytes(),
            self.ctx.config.progress_step_percent,
        );
        let strip_root = sources.len() == 1 && inventory.entries()[0].is_dir();

        for entry in &inventory {
            self.ctx.check_cancelled()?;

            // Never compress the archive into itself.
            if entry.path == self.archive {
                self.ctx.report(tracker.skip_unit(entry.size));
                continue;
            }

            let Some(name) = entry_name(entry, strip_root) else {
                self.ctx.report(tracker.complete_unit());
                continue;
            };
            tracker.begin(&entry.path);

            if entry.is_dir() {
                writer
                    .add_directory(name, options)
                    .map_err(|err| self.classify(io::Error::from(err)))?;
                self.report.succeed();
            } else if !self.add_file(&mut writer, entry, name, options, &mut tracker)? {
                continue;
            }
            self.ctx.report(tracker.complete_unit());
        }

        let mut inner = writer
            .finish()
            .map_err(|err| self.classify(io::Error::from(err)))?;
        inner.flush().map_err(|err| self.classify(err))?;
        drop(inner);

        self.ctx.stamp_permissions(self.archive);
        self.ctx.services.index.reindex(self.destination);
        info!(
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            bytes = self.written_bytes,
            "zip finished"
        );
        Ok(())
    }

    /// Stream one file into the archive. Returns `false` when the source
    /// could not be opened and its unit was counted as skipped.
    fn add_file<W: Write + Seek>(
        &mut self,
        writer: &mut ZipWriter<BufWriter<W>>,
        entry: &InventoryEntry,
        name: String,
        options: SimpleFileOptions,
        tracker: &mut ProgressTracker,
    ) -> Result<bool, OperationError> {
        let source = match File::open(&entry.path) {
            Ok(f) => f,
            Err(err) => {
                self.report
                    .fail(ItemError::new(&entry.path, ErrorKind::SourceNotFound, err.to_string()));
                self.ctx.report(tracker.skip_unit(entry.size));
                return Ok(false);
            }
        };

        writer
            .start_file(name, options)
            .map_err(|err| self.classify(io::Error::from(err)))?;

        let mut reader = BufReader::new(source);
        match self.ctx.stream(&mut reader, writer, tracker, false) {
            Ok(bytes) => {
                self.written_bytes += bytes;
                self.report.succeed();
                Ok(true)
            }
            Err(StreamError::Cancelled) => Err(OperationError::Cancelled),
            Err(StreamError::Read(err)) | Err(StreamError::Write(err)) => Err(self.classify(err)),
        }
    }

    /// Blame a write failure on space when the destination has run low,
    /// otherwise on the destination not being writable.
    fn classify(&self, err: io::Error) -> OperationError {
        if fileferry_core::is_out_of_space(&err)
            || self.ctx.space_guard().below_headroom(self.destination)
        {
            warn!(archive = %self.archive.display(), %err, "archive write failed, destination full");
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
            return self.ctx.report_no_space(self.destination, err);
        }
        warn!(archive = %self.archive.display(), %err, "archive write failed");
        OperationError::DestinationReadOnly {
            path: self.archive.to_path_buf(),
            source: err,
        }
    }
}

/// Archive name of `entry`, `/`-separated, directories ending in `/`.
///
/// With `strip_root` the single source directory itself gets no entry and
/// its children are named relative to it.
fn entry_name(entry: &InventoryEntry, strip_root: bool) -> Option<String> {
    let skip = usize::from(strip_root);
    let parts: Vec<String> = entry
        .relative
        .components()
        .skip(skip)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let mut name = parts.join("/");
    if entry.is_dir() {
        name.push('/');
    }
    Some(name)
}

fn remove_partial(archive: &Path) {
    match fs::remove_file(archive) {
        Ok(()) => debug!(path = %archive.display(), "partial archive removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %archive.display(), %err, "partial archive not removed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestRun;
    use crate::inventory::EntryKind;
    use crate::progress::Outcome;
    use crate::arbiter::ConflictKind;
    use crate::executor::OperationEvent;
    use crate::services::Services;
    use crate::space::SpaceProbe;
    use std::io::{Read, SeekFrom};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use zip::ZipArchive;

    /// Writes through to a real file until `budget` bytes, then fails.
    struct FailingWriter {
        inner: File,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("write rejected"));
            }
            let n = buf.len().min(self.budget);
            let n = self.inner.write(&buf[..n])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FailingWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Plenty of space for the first measurement, almost none afterwards.
    #[derive(Default)]
    struct DrainingSpace {
        calls: AtomicUsize,
    }

    impl SpaceProbe for DrainingSpace {
        fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(1 << 30)
            } else {
                Ok(1024)
            }
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn failing_output(path: &Path) -> io::Result<FailingWriter> {
        Ok(FailingWriter {
            inner: File::create(path)?,
            budget: 4096,
        })
    }

    fn names(archive: &Path) -> Vec<String> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_entry_names() {
        let entry = InventoryEntry {
            path: PathBuf::from("/a/docs/sub"),
            relative: PathBuf::from("docs/sub"),
            root: 0,
            kind: EntryKind::Directory,
            size: 0,
        };
        assert_eq!(entry_name(&entry, false).as_deref(), Some("docs/sub/"));
        assert_eq!(entry_name(&entry, true).as_deref(), Some("sub/"));

        let root = InventoryEntry {
            relative: PathBuf::from("docs"),
            ..entry
        };
        assert_eq!(entry_name(&root, true), None);
    }

    #[test]
    fn test_zip_directory() {
        let temp = TempDir::new().unwrap();
        let docs = temp.path().join("docs");
        fs::create_dir_all(docs.join("sub")).unwrap();
        fs::write(docs.join("a.txt"), "alpha").unwrap();
        fs::write(docs.join("sub/b.txt"), "beta").unwrap();

        let run = TestRun::new(Services::default(), Decision::Yes);
        let done = run_zip(&run.ctx, &[docs], temp.path(), "docs.zip");
        assert!(done.is_success(), "{:?}", done.errors);

        let archive = temp.path().join("docs.zip");
        assert_eq!(names(&archive), vec!["a.txt", "sub/", "sub/b.txt"]);

        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("sub/b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "beta");
        run.finish();
    }

    #[test]
    fn test_zip_several_sources() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one.txt"), "1").unwrap();
        fs::create_dir_all(temp.path().join("two")).unwrap();
        fs::write(temp.path().join("two/three.txt"), "3").unwrap();
        let out = temp.path().join("out");

        let run = TestRun::new(Services::default(), Decision::Yes);
        let done = run_zip(
            &run.ctx,
            &[temp.path().join("one.txt"), temp.path().join("two")],
            &out,
            "bundle.zip",
        );
        assert!(done.is_success(), "{:?}", done.errors);
        assert_eq!(
            names(&out.join("bundle.zip")),
            vec!["one.txt", "two/", "two/three.txt"]
        );
        run.finish();
    }

    #[test]
    fn test_declined_overwrite_keeps_old_archive() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("a.zip"), "old").unwrap();

        let run = TestRun::new(Services::default(), Decision::No);
        let done = run_zip(&run.ctx, &[temp.path().join("a.txt")], temp.path(), "a.zip");

        assert_eq!(done.outcome, Outcome::Cancelled);
        assert_eq!(fs::read_to_string(temp.path().join("a.zip")).unwrap(), "old");
        run.finish();
    }

    #[test]
    fn test_write_failure_after_space_dropped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("big.bin"), noise(256 * 1024)).unwrap();
        let space = Arc::new(DrainingSpace::default());

        let run = TestRun::new(
            Services::default().with_space_probe(space.clone()),
            Decision::Yes,
        );
        let done = zip_with_output(
            &run.ctx,
            &[temp.path().join("big.bin")],
            temp.path(),
            "big.zip",
            failing_output,
        );

        assert_eq!(done.outcome, Outcome::Failed(ErrorKind::InsufficientSpace));
        assert!(space.calls.load(Ordering::SeqCst) >= 2);
        assert!(!temp.path().join("big.zip").exists());
        let events = run.finish();
        let kinds: Vec<ConflictKind> = events
            .iter()
            .filter_map(|e| match e {
                OperationEvent::Conflict(q) => Some(q.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ConflictKind::InsufficientSpace]);
    }

    #[test]
    fn test_write_failure_with_space_left_is_read_only() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("big.bin"), noise(256 * 1024)).unwrap();

        let run = TestRun::new(Services::default(), Decision::Yes);
        let done = zip_with_output(
            &run.ctx,
            &[temp.path().join("big.bin")],
            temp.path(),
            "big.zip",
            failing_output,
        );

        assert_eq!(done.outcome, Outcome::Failed(ErrorKind::DestinationReadOnly));
        assert!(!temp.path().join("big.zip").exists());
        let events = run.finish();
        assert_eq!(TestRun::conflicts(&events), 0);
    }

    #[test]
    fn test_cancel_removes_partial_archive() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();

        let run = TestRun::new(Services::default(), Decision::Yes);
        run.cancel.cancel();
        let done = run_zip(&run.ctx, &[temp.path().join("a.txt")], temp.path(), "a.zip");

        assert_eq!(done.outcome, Outcome::Cancelled);
        assert!(!temp.path().join("a.zip").exists());
        run.finish();
    }
}
