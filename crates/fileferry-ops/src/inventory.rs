//! Flat pre-order inventory of the units an operation will touch.

use std::fs;
use std::path::{Path, PathBuf};

use jwalk::{Parallelism, WalkDir};
use tracing::{debug, warn};

use fileferry_core::OperationError;

/// Whether an inventory entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One unit of work.
#[derive(Debug, Clone)]
pub struct InventoryEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Path relative to the parent of its source root, so it starts with
    /// the root's own name.
    pub relative: PathBuf,
    /// Index of the source root this entry was found under.
    pub root: usize,
    /// File or directory.
    pub kind: EntryKind,
    /// Length in bytes; always 0 for directories.
    pub size: u64,
}

impl InventoryEntry {
    /// Check if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Ordered list of units plus the byte total of the regular files among them.
///
/// Built once before any mutation and never re-validated; entries that
/// vanish later are handled one by one by the operation.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
    total_bytes: u64,
}

impl Inventory {
    /// Walk `sources` in order.
    ///
    /// Missing roots are skipped. A file root is one unit carrying its
    /// length; a directory root is one unit followed by its subtree in
    /// pre-order. An empty source list is an error for the whole run.
    pub fn build(sources: &[PathBuf]) -> Result<Self, OperationError> {
        if sources.is_empty() {
            return Err(OperationError::SourceNotFound {
                path: PathBuf::new(),
            });
        }

        let mut inventory = Self::default();
        for (root_index, root) in sources.iter().enumerate() {
            let metadata = match fs::metadata(root) {
                Ok(m) => m,
                Err(err) => {
                    debug!(path = %root.display(), %err, "skipping missing source");
                    continue;
                }
            };

            let base = root.parent().unwrap_or(root);
            if metadata.is_dir() {
                inventory.walk_directory(root, base, root_index);
            } else {
                inventory.push(root, base, root_index, EntryKind::File, metadata.len());
            }
        }

        debug!(
            units = inventory.len(),
            bytes = inventory.total_bytes,
            "inventory built"
        );
        Ok(inventory)
    }

    fn walk_directory(&mut self, root: &Path, base: &Path, root_index: usize) {
        let walker = WalkDir::new(root)
            .parallelism(Parallelism::Serial)
            .skip_hidden(false)
            .follow_links(false)
            .sort(true);

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    warn!(root = %root.display(), %err, "unreadable entry skipped");
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                self.push(&path, base, root_index, EntryKind::Directory, 0);
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(m) => self.push(&path, base, root_index, EntryKind::File, m.len()),
                    Err(err) => warn!(path = %path.display(), %err, "metadata unavailable"),
                }
            } else if file_type.is_symlink() {
                // Links are copied by content; links to directories are not followed.
                match fs::metadata(&path) {
                    Ok(m) if m.is_file() => {
                        self.push(&path, base, root_index, EntryKind::File, m.len())
                    }
                    _ => debug!(path = %path.display(), "skipping link"),
                }
            }
        }
    }

    fn push(&mut self, path: &Path, base: &Path, root: usize, kind: EntryKind, size: u64) {
        let relative = path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
        self.total_bytes += size;
        self.entries.push(InventoryEntry {
            path: path.to_path_buf(),
            relative,
            root,
            kind,
            size,
        });
    }

    /// All entries in traversal order.
    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    /// Iterate over entries in traversal order.
    pub fn iter(&self) -> std::slice::Iter<'_, InventoryEntry> {
        self.entries.iter()
    }

    /// Number of units (files plus directories).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was found.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of regular-file lengths.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of file units.
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir()).count()
    }

    /// Number of directory units.
    pub fn dir_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dir()).count()
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a InventoryEntry;
    type IntoIter = std::slice::Iter<'a, InventoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/a.txt"), "hello").unwrap();
        fs::write(root.join("src/.hidden"), "xy").unwrap();
        fs::write(root.join("src/nested/b.txt"), "world world").unwrap();
        fs::write(root.join("single.bin"), vec![0u8; 100]).unwrap();

        temp
    }

    #[test]
    fn test_counts_and_bytes() {
        let temp = create_test_tree();
        let sources = vec![temp.path().join("src"), temp.path().join("single.bin")];

        let inventory = Inventory::build(&sources).unwrap();

        // src, src/nested directories; a.txt, .hidden, b.txt, single.bin files
        assert_eq!(inventory.dir_count(), 2);
        assert_eq!(inventory.file_count(), 4);
        assert_eq!(inventory.len(), 6);
        assert_eq!(inventory.total_bytes(), 5 + 2 + 11 + 100);
    }

    #[test]
    fn test_preorder_and_relative_paths() {
        let temp = create_test_tree();
        let inventory = Inventory::build(&[temp.path().join("src")]).unwrap();

        let first = &inventory.entries()[0];
        assert!(first.is_dir());
        assert_eq!(first.relative, PathBuf::from("src"));

        // Every directory precedes its children.
        for (i, entry) in inventory.iter().enumerate() {
            if let Some(parent) = entry.path.parent() {
                if let Some(pos) = inventory.iter().position(|e| e.path == parent) {
                    assert!(pos < i);
                }
            }
            assert!(entry.relative.starts_with("src"));
        }
    }

    #[test]
    fn test_missing_roots_skipped() {
        let temp = create_test_tree();
        let sources = vec![temp.path().join("nope"), temp.path().join("single.bin")];

        let inventory = Inventory::build(&sources).unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.entries()[0].root, 1);
        assert_eq!(inventory.entries()[0].relative, PathBuf::from("single.bin"));
    }

    #[test]
    fn test_empty_sources_error() {
        let err = Inventory::build(&[]).unwrap_err();
        assert_eq!(err.kind(), fileferry_core::ErrorKind::SourceNotFound);
    }
}
