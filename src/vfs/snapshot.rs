//! Immutable directory/file index produced by the format generators.

use std::collections::HashMap;
use std::fmt;

use super::Path;
use crate::io::StreamHandle;
use crate::{Error, Result};

/// One directory: its absolute path and the names of its children, in
/// table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: Path,
    pub dir_names: Vec<String>,
    pub file_names: Vec<String>,
}

impl DirectoryEntry {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            dir_names: Vec::new(),
            file_names: Vec::new(),
        }
    }
}

/// One file: a stream over its content, usually a
/// [`crate::io::SubStream`] into the container's base stream.
#[derive(Clone, Default)]
pub struct FileEntry {
    pub stream: Option<StreamHandle>,
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("length", &self.stream.as_ref().map(|s| s.borrow().length()))
            .finish()
    }
}

/// A directory tree with per-file streams, addressed by [`Path`].
///
/// Built once by a generator, then handed to
/// [`crate::vfs::VirtualFileSystem::new`] and never modified again.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub dir_entries: Vec<DirectoryEntry>,
    pub dir_map: HashMap<Path, usize>,
    pub file_entries: Vec<FileEntry>,
    pub file_map: HashMap<Path, usize>,
}

impl Snapshot {
    /// A snapshot holding only the root directory.
    pub fn with_root() -> Self {
        let mut snapshot = Self::default();
        snapshot.dir_entries.push(DirectoryEntry::new(Path::root()));
        snapshot.dir_map.insert(Path::root(), 0);
        snapshot
    }

    /// True if exactly one directory is the root and the root index points
    /// at it.
    pub fn has_valid_root(&self) -> bool {
        let root = Path::root();
        let roots = self.dir_entries.iter().filter(|d| d.path == root).count();
        roots == 1
            && self
                .dir_map
                .get(&root)
                .and_then(|&i| self.dir_entries.get(i))
                .is_some_and(|d| d.path == root)
    }

    fn child_path(&self, parent: &Path, name: &str) -> Result<(usize, Path)> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::Corrupt("invalid entry name"));
        }
        let parent_index = *self
            .dir_map
            .get(parent)
            .ok_or(Error::Corrupt("parent directory is not indexed"))?;
        let path = parent.join(name);
        if self.dir_map.contains_key(&path) || self.file_map.contains_key(&path) {
            return Err(Error::Corrupt("duplicate path"));
        }
        Ok((parent_index, path))
    }

    /// Add directory `name` under the already-indexed `parent`.
    pub fn add_directory(&mut self, parent: &Path, name: &str) -> Result<Path> {
        let (parent_index, path) = self.child_path(parent, name)?;
        self.dir_entries[parent_index].dir_names.push(name.to_owned());
        self.dir_map.insert(path.clone(), self.dir_entries.len());
        self.dir_entries.push(DirectoryEntry::new(path.clone()));
        Ok(path)
    }

    /// Add file `name` with content `stream` under the already-indexed
    /// `parent`.
    pub fn add_file(&mut self, parent: &Path, name: &str, stream: StreamHandle) -> Result<Path> {
        let (parent_index, path) = self.child_path(parent, name)?;
        self.dir_entries[parent_index].file_names.push(name.to_owned());
        self.file_map.insert(path.clone(), self.file_entries.len());
        self.file_entries.push(FileEntry {
            stream: Some(stream),
        });
        Ok(path)
    }
}
