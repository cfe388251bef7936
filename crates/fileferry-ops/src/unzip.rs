//! Extraction of a zip archive into a directory named after it.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use fileferry_core::{ErrorKind, ItemError, OperationError, OperationKind};

use crate::arbiter::{ConflictQuery, Decision};
use crate::context::{RunContext, RunReport, StreamError};
use crate::progress::{OperationComplete, ProgressTracker};

/// Central-directory facts about one archive entry.
#[derive(Debug, Clone)]
pub(crate) struct EntryHeader {
    pub name: String,
    /// The name as a relative path, or `None` if it would leave the
    /// extraction directory.
    pub enclosed: Option<PathBuf>,
    pub is_dir: bool,
    /// Uncompressed size, `None` when the archive does not record it.
    pub declared_size: Option<u64>,
}

/// Random-access reader over archive entries.
pub(crate) trait ArchiveSource {
    fn headers(&mut self) -> Result<Vec<EntryHeader>, String>;
    fn open_entry(&mut self, index: usize) -> io::Result<Box<dyn Read + '_>>;
}

/// [`ArchiveSource`] over a zip file on disk.
pub(crate) struct ZipSource {
    archive: ZipArchive<BufReader<File>>,
}

impl ZipSource {
    pub fn open(path: &Path) -> Result<Self, OperationError> {
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => OperationError::SourceNotFound {
                path: path.to_path_buf(),
            },
            _ => OperationError::ArchiveReadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        })?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|err| {
            OperationError::ArchiveReadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        Ok(Self { archive })
    }
}

impl ArchiveSource for ZipSource {
    fn headers(&mut self) -> Result<Vec<EntryHeader>, String> {
        (0..self.archive.len())
            .map(|index| {
                let entry = self
                    .archive
                    .by_index_raw(index)
                    .map_err(|err| err.to_string())?;
                // Sizes past the signed range are how unknown sizes surface.
                let size = entry.size();
                Ok(EntryHeader {
                    name: entry.name().to_string(),
                    enclosed: entry.enclosed_name(),
                    is_dir: entry.is_dir(),
                    declared_size: i64::try_from(size).ok().map(|_| size),
                })
            })
            .collect()
    }

    fn open_entry(&mut self, index: usize) -> io::Result<Box<dyn Read + '_>> {
        let entry = self.archive.by_index(index).map_err(io::Error::from)?;
        Ok(Box::new(entry))
    }
}

/// Extract `archive` into `destination/<archive stem>`.
pub(crate) fn run_unzip(ctx: &RunContext, archive: &Path, destination: &Path) -> OperationComplete {
    let target = extraction_dir(archive, destination);
    info!(archive = %archive.display(), target = %target.display(), "unzip started");

    let mut unzip = Unzip {
        ctx,
        archive,
        destination,
        target: &target,
        report: RunReport::default(),
        written_bytes: 0,
    };
    let result = ZipSource::open(archive).and_then(|mut source| unzip.extract(&mut source));
    let bytes = unzip.written_bytes;
    unzip.report.into_complete(OperationKind::Unzip, bytes, result)
}

/// Default extraction directory: the archive name without its extension.
fn extraction_dir(archive: &Path, destination: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .or_else(|| archive.file_name())
        .unwrap_or_else(|| OsStr::new("extracted"));
    destination.join(stem)
}

struct Unzip<'a> {
    ctx: &'a RunContext,
    archive: &'a Path,
    destination: &'a Path,
    target: &'a Path,
    report: RunReport,
    written_bytes: u64,
}

impl Unzip<'_> {
    fn extract<S: ArchiveSource>(&mut self, source: &mut S) -> Result<(), OperationError> {
        let headers = source.headers().map_err(|message| self.read_failed(message))?;

        // Sized before anything is touched on disk.
        let mut total = 0u64;
        for header in &headers {
            match header.declared_size {
                Some(size) => total = total.saturating_add(size),
                None => {
                    return Err(self.read_failed(format!("unknown size for entry {}", header.name)));
                }
            }
        }

        if fs::symlink_metadata(self.target).is_ok() {
            if self.ctx.ask(ConflictQuery::overwrite(self.target)) == Decision::No {
                debug!("existing extraction directory kept");
                return Err(OperationError::Cancelled);
            }
            remove_existing(self.target).map_err(|err| OperationError::io(self.target, err))?;
        }

        self.ctx.preflight_space(self.destination, total)?;

        fs::create_dir_all(self.target).map_err(|source| OperationError::DirectoryCreateFailed {
            path: self.target.to_path_buf(),
            source,
        })?;
        self.ctx.stamp_permissions(self.target);

        let mut tracker = ProgressTracker::new(
            OperationKind::Unzip,
            headers.len(),
            total,
            self.ctx.config.progress_step_percent,
        );

        for (index, header) in headers.iter().enumerate() {
            self.ctx.check_cancelled()?;
            tracker.begin(Path::new(&header.name));

            let Some(relative) = &header.enclosed else {
                self.report.fail(ItemError::new(
                    self.archive,
                    ErrorKind::ArchiveReadFailed,
                    format!("entry {} escapes the extraction directory", header.name),
                ));
                self.ctx.report(tracker.skip_unit(header.declared_size.unwrap_or(0)));
                continue;
            };
            let output = self.target.join(relative);

            if header.is_dir {
                self.extract_directory(&output);
            } else {
                self.extract_file(source, index, header, &output, &mut tracker)?;
            }
            self.ctx.report(tracker.complete_unit());
        }

        self.ctx.services.index.reindex(self.target);
        info!(
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            bytes = self.written_bytes,
            "unzip finished"
        );
        Ok(())
    }

    fn extract_directory(&mut self, output: &Path) {
        match fs::create_dir_all(output) {
            Ok(()) => {
                self.ctx.stamp_permissions(output);
                self.report.succeed();
            }
            Err(source) => self.report.fail(
                OperationError::DirectoryCreateFailed {
                    path: output.to_path_buf(),
                    source,
                }
                .into(),
            ),
        }
    }

    fn extract_file<S: ArchiveSource>(
        &mut self,
        source: &mut S,
        index: usize,
        header: &EntryHeader,
        output: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<(), OperationError> {
        if let Some(parent) = output.parent() {
            if let Err(source) = fs::create_dir_all(parent) {
                self.report.fail(
                    OperationError::DirectoryCreateFailed {
                        path: parent.to_path_buf(),
                        source,
                    }
                    .into(),
                );
                return Ok(());
            }
        }

        let mut reader = match source.open_entry(index) {
            Ok(r) => r,
            Err(err) => {
                self.entry_unreadable(header, err);
                return Ok(());
            }
        };
        let file = match File::create(output) {
            Ok(f) => f,
            Err(err) => return self.write_failed(output, err),
        };
        let mut writer = BufWriter::new(file);

        match self.ctx.stream(&mut reader, &mut writer, tracker, false) {
            Ok(bytes) => {
                drop(writer);
                self.ctx.stamp_permissions(output);
                self.written_bytes += bytes;
                self.report.succeed();
                Ok(())
            }
            // Partially written entries stay where they are.
            Err(StreamError::Cancelled) => Err(OperationError::Cancelled),
            Err(StreamError::Read(err)) => {
                self.entry_unreadable(header, err);
                Ok(())
            }
            Err(StreamError::Write(err)) => self.write_failed(output, err),
        }
    }

    fn entry_unreadable(&mut self, header: &EntryHeader, err: io::Error) {
        warn!(entry = %header.name, %err, "archive entry unreadable, continuing");
        self.report.fail(ItemError::new(
            self.archive,
            ErrorKind::ArchiveReadFailed,
            format!("{}: {err}", header.name),
        ));
    }

    fn write_failed(&mut self, output: &Path, err: io::Error) -> Result<(), OperationError> {
        match OperationError::io(output, err) {
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

    fn read_failed(&self, message: String) -> OperationError {
        OperationError::ArchiveReadFailed {
            path: self.archive.to_path_buf(),
            message,
        }
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
