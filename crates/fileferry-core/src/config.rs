//! Engine configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Size of one streaming chunk for copy, zip and unzip.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Free space that must stay untouched on primary storage.
pub const DEFAULT_RESERVED_HEADROOM: u64 = 2 * 1024 * 1024;

/// Configuration shared by every operation an executor runs.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Bytes read and written per streaming step.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum aggregate progress increment (in percent) between two
    /// progress events.
    #[builder(default = "10")]
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: u8,

    /// Headroom kept free on primary storage, and the threshold below which
    /// a failed archive write is blamed on lack of space.
    #[builder(default = "DEFAULT_RESERVED_HEADROOM")]
    #[serde(default = "default_reserved_headroom")]
    pub reserved_headroom: u64,

    /// Mount root of the primary removable storage, if any.
    #[builder(default)]
    #[serde(default)]
    pub primary_storage_root: Option<PathBuf>,

    /// Permission bits stamped on every created file and directory.
    #[builder(default = "0o777")]
    #[serde(default = "default_canonical_mode")]
    pub canonical_mode: u32,

    /// Directory holding thumbnail artifacts to purge on delete.
    #[builder(default)]
    #[serde(default)]
    pub thumbnail_dir: Option<PathBuf>,

    /// Capacity of the event channel between worker and UI.
    #[builder(default = "100")]
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_step() -> u8 {
    10
}

fn default_reserved_headroom() -> u64 {
    DEFAULT_RESERVED_HEADROOM
}

fn default_canonical_mode() -> u32 {
    0o777
}

fn default_event_buffer() -> usize {
    100
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if let Some(step) = self.progress_step_percent {
            if step == 0 || step > 100 {
                return Err("Progress step must be between 1 and 100 percent".to_string());
            }
        }
        if self.event_buffer == Some(0) {
            return Err("Event buffer must hold at least one event".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Check whether `path` lives on the primary removable storage.
    pub fn is_primary_storage(&self, path: &Path) -> bool {
        self.primary_storage_root
            .as_ref()
            .is_some_and(|root| path.starts_with(root))
    }

    /// Re-check the invariants `build()` enforces, for configs that were
    /// deserialized instead of built.
    pub fn validate(&self) -> Result<(), String> {
        let mut builder = EngineConfigBuilder::default();
        builder
            .chunk_size(self.chunk_size)
            .progress_step_percent(self.progress_step_percent)
            .event_buffer(self.event_buffer);
        builder.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_step_percent: 10,
            reserved_headroom: DEFAULT_RESERVED_HEADROOM,
            primary_storage_root: None,
            canonical_mode: 0o777,
            thumbnail_dir: None,
            event_buffer: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .chunk_size(4096usize)
            .primary_storage_root(Some(PathBuf::from("/sdcard")))
            .build()
            .unwrap();

        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.progress_step_percent, 10);
        assert_eq!(config.reserved_headroom, 2 * 1024 * 1024);
        assert_eq!(config.canonical_mode, 0o777);
    }

    #[test]
    fn test_config_rejects_zero_chunk() {
        assert!(EngineConfig::builder().chunk_size(0usize).build().is_err());
        assert!(
            EngineConfig::builder()
                .progress_step_percent(0u8)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_primary_storage() {
        let config = EngineConfig::builder()
            .primary_storage_root(Some(PathBuf::from("/sdcard")))
            .build()
            .unwrap();

        assert!(config.is_primary_storage(Path::new("/sdcard/Music")));
        assert!(!config.is_primary_storage(Path::new("/local/Music")));
        assert!(!EngineConfig::default().is_primary_storage(Path::new("/sdcard")));
    }

    #[test]
    fn test_deserialized_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        config.progress_step_percent = 101;
        assert!(config.validate().is_err());
    }
}
