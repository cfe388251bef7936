//! Collaborators an operation notifies: the media index, the thumbnail
//! cache and the wake lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use fileferry_core::EngineConfig;

use crate::space::{SpaceProbe, StatvfsProbe};

/// External searchable catalog kept in sync with mutations.
///
/// Never consulted for decisions; calls are fire-and-forget.
pub trait MediaIndex: Send + Sync {
    /// A path was created or updated.
    fn reindex(&self, path: &Path);
    /// Something under `dir` changed in bulk; rescan the subtree.
    fn rescan_subtree(&self, dir: &Path);
    /// A path was removed.
    fn remove(&self, path: &Path);
}

/// Index that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndex;

impl MediaIndex for NoopIndex {
    fn reindex(&self, _path: &Path) {}
    fn rescan_subtree(&self, _dir: &Path) {}
    fn remove(&self, _path: &Path) {}
}

/// Identity of the cached thumbnail artifacts of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailKey {
    /// blake3 digest of the full path, hex encoded.
    pub path_hash: String,
    /// Modification time in milliseconds since the epoch.
    pub modified_ms: u128,
    /// Final path component.
    pub file_name: String,
}

impl ThumbnailKey {
    /// Build the key of `path` as it was last modified at `modified`.
    pub fn new(path: &Path, modified: SystemTime) -> Self {
        Self {
            path_hash: blake3::hash(path.as_os_str().as_encoded_bytes())
                .to_hex()
                .to_string(),
            modified_ms: modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Artifact file name under a thumbnail directory.
    pub fn artifact_name(&self) -> String {
        format!("{}_{}_{}", self.path_hash, self.modified_ms, self.file_name)
    }
}

/// Cache of generated thumbnails, invalidated on delete.
pub trait ThumbnailCache: Send + Sync {
    /// Drop every artifact stored under `key`.
    fn purge(&self, key: &ThumbnailKey);
}

/// Cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThumbnails;

impl ThumbnailCache for NoThumbnails {
    fn purge(&self, _key: &ThumbnailKey) {}
}

/// Thumbnails stored as flat files named by [`ThumbnailKey::artifact_name`].
#[derive(Debug, Clone)]
pub struct DiskThumbnailCache {
    dir: PathBuf,
}

impl DiskThumbnailCache {
    /// Use `dir` as the artifact directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the artifact for `key`.
    pub fn artifact_path(&self, key: &ThumbnailKey) -> PathBuf {
        self.dir.join(key.artifact_name())
    }
}

impl ThumbnailCache for DiskThumbnailCache {
    fn purge(&self, key: &ThumbnailKey) {
        let artifact = self.artifact_path(key);
        match fs::remove_file(&artifact) {
            Ok(()) => debug!(path = %artifact.display(), "thumbnail purged"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(path = %artifact.display(), %err, "thumbnail purge failed"),
        }
    }
}

/// Keeps the device awake while a run is in progress.
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Wake lock for hosts that never sleep mid-run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Holds a [`WakeLock`] until dropped, including during unwinding.
pub struct WakeGuard {
    lock: Arc<dyn WakeLock>,
}

impl WakeGuard {
    /// Acquire `lock` for the lifetime of the guard.
    pub fn acquire(lock: Arc<dyn WakeLock>) -> Self {
        lock.acquire();
        Self { lock }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// The set of collaborators handed to every run.
#[derive(Clone)]
pub struct Services {
    pub index: Arc<dyn MediaIndex>,
    pub thumbnails: Arc<dyn ThumbnailCache>,
    pub space: Arc<dyn SpaceProbe>,
    pub wake_lock: Arc<dyn WakeLock>,
}

impl Services {
    /// Default collaborators for `config`: statvfs free space, and a disk
    /// thumbnail cache when a thumbnail directory is configured.
    pub fn for_config(config: &EngineConfig) -> Self {
        let thumbnails: Arc<dyn ThumbnailCache> = match &config.thumbnail_dir {
            Some(dir) => Arc::new(DiskThumbnailCache::new(dir)),
            None => Arc::new(NoThumbnails),
        };
        Self {
            thumbnails,
            ..Self::default()
        }
    }

    /// Replace the media index.
    pub fn with_index(mut self, index: Arc<dyn MediaIndex>) -> Self {
        self.index = index;
        self
    }

    /// Replace the thumbnail cache.
    pub fn with_thumbnails(mut self, thumbnails: Arc<dyn ThumbnailCache>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    /// Replace the free-space probe.
    pub fn with_space_probe(mut self, space: Arc<dyn SpaceProbe>) -> Self {
        self.space = space;
        self
    }

    /// Replace the wake lock.
    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            index: Arc::new(NoopIndex),
            thumbnails: Arc::new(NoThumbnails),
            space: Arc::new(StatvfsProbe),
            wake_lock: Arc::new(NoWakeLock),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_thumbnail_key_artifact_name() {
        let modified = UNIX_EPOCH + std::time::Duration::from_millis(1234);
        let key = ThumbnailKey::new(Path::new("/pics/cat.jpg"), modified);

        assert_eq!(key.path_hash.len(), 64);
        assert_eq!(key.modified_ms, 1234);
        assert!(key.artifact_name().ends_with("_1234_cat.jpg"));
        assert_eq!(key, ThumbnailKey::new(Path::new("/pics/cat.jpg"), modified));
    }

    #[test]
    fn test_disk_cache_purges_artifact() {
        let temp = TempDir::new().unwrap();
        let cache = DiskThumbnailCache::new(temp.path());
        let key = ThumbnailKey::new(Path::new("/pics/cat.jpg"), UNIX_EPOCH);

        let artifact = cache.artifact_path(&key);
        fs::write(&artifact, "thumb").unwrap();
        cache.purge(&key);
        assert!(!artifact.exists());

        // Purging again is harmless.
        cache.purge(&key);
    }

    #[derive(Default)]
    struct CountingLock {
        held: AtomicUsize,
    }

    impl WakeLock for CountingLock {
        fn acquire(&self) {
            self.held.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wake_guard_releases_on_drop() {
        let lock = Arc::new(CountingLock::default());
        {
            let _guard = WakeGuard::acquire(lock.clone());
            assert_eq!(lock.held.load(Ordering::SeqCst), 1);
        }
        assert_eq!(lock.held.load(Ordering::SeqCst), 0);
    }
}
