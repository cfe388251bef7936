//! Pre-flight free space check.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use fileferry_core::{EngineConfig, OperationError};

/// Source of free-space figures for a destination.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to an unprivileged writer at `path`.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by `statvfs(3)`.
///
/// Destinations that do not exist yet are measured at their nearest
/// existing ancestor.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let existing = nearest_existing(path);
        let c_path = CString::new(existing.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        // SAFETY: c_path is a valid NUL-terminated string and stat points to writable memory
        let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: statvfs succeeded, stat is initialized
        let stat = unsafe { stat.assume_init() };

        #[allow(clippy::unnecessary_cast)]
        let available = stat.f_bavail as u64 * stat.f_frsize as u64;
        Ok(available)
    }

    #[cfg(not(unix))]
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}

/// Walk up from `path` to the first ancestor that exists.
fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Compares a run's byte total against destination free space.
pub struct SpaceGuard<'a> {
    config: &'a EngineConfig,
    probe: &'a dyn SpaceProbe,
}

impl<'a> SpaceGuard<'a> {
    /// Create a guard using `probe` for measurements.
    pub fn new(config: &'a EngineConfig, probe: &'a dyn SpaceProbe) -> Self {
        Self { config, probe }
    }

    /// Check that `required` bytes fit at `destination`.
    ///
    /// On primary storage the reserved headroom must remain free on top of
    /// `required`. A probe failure is logged and lets the run proceed; a
    /// write that then runs out of space is still caught mid-stream.
    pub fn check(&self, destination: &Path, required: u64) -> Result<u64, OperationError> {
        let available = match self.probe.available_bytes(destination) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %destination.display(), %err, "free space unknown");
                return Ok(u64::MAX);
            }
        };

        // On primary storage free space must stay strictly above the reserve.
        let primary = self.config.is_primary_storage(destination);
        let needed = if primary {
            required.saturating_add(self.config.reserved_headroom)
        } else {
            required
        };

        debug!(
            path = %destination.display(),
            required,
            needed,
            available,
            "space check"
        );

        if available < needed || (primary && available == needed) {
            return Err(OperationError::InsufficientSpace {
                path: destination.to_path_buf(),
                required,
                available,
            });
        }
        Ok(available)
    }

    /// Check whether free space at `destination` has fallen below the
    /// reserved headroom.
    pub fn below_headroom(&self, destination: &Path) -> bool {
        self.probe
            .available_bytes(destination)
            .is_ok_and(|available| available < self.config.reserved_headroom)
    }
}
