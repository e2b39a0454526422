//! Path-addressed filesystems.
//!
//! [`VirtualFileSystem`] serves a read-only [`Snapshot`] produced by one of
//! the generators in [`crate::formats`]; [`LocalFileSystem`] maps the same
//! interface onto a host directory so extraction code can copy between the
//! two without caring which side is which.

pub mod local;
pub mod path;
pub mod snapshot;

use log::debug;

use crate::io::StreamHandle;
use crate::{Error, Result};

pub use local::LocalFileSystem;
pub use path::Path;
pub use snapshot::{DirectoryEntry, FileEntry, Snapshot};

/// The children of one directory, as returned by
/// [`FileSystem::get_directory_listing`].
pub type DirectoryListing = DirectoryEntry;

/// How [`FileSystem::open_file`] treats an existing or missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Create a new file; fail if it exists.
    CreateNew,
    /// Create a new file, truncating any existing one.
    Create,
    /// Open an existing file.
    Open,
    /// Open the file, creating it if missing.
    OpenOrCreate,
    /// Open an existing file and truncate it.
    Truncate,
    /// Open or create the file and position at its end.
    Append,
}

/// Access requested from [`FileSystem::open_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

/// Operations shared by every filesystem in the crate.
pub trait FileSystem {
    fn open_file(&mut self, path: &Path, mode: FileMode, access: FileAccess) -> Result<StreamHandle>;
    fn create_file(&mut self, path: &Path) -> Result<()>;
    fn remove_file(&mut self, path: &Path) -> Result<()>;
    fn create_directory(&mut self, path: &Path) -> Result<()>;
    fn remove_directory(&mut self, path: &Path) -> Result<()>;
    fn get_working_directory(&self) -> Result<Path>;
    fn set_working_directory(&mut self, path: &Path) -> Result<()>;
    fn get_directory_listing(&self, path: &Path) -> Result<DirectoryListing>;
    fn dispose(&mut self);
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Uninitialized,
    Ready {
        snapshot: Snapshot,
        cwd: Path,
    },
    Disposed,
}

/// A read-only filesystem over a [`Snapshot`].
///
/// The default value is uninitialized. A disposed filesystem fails every
/// operation the same way an uninitialized one does.
#[derive(Debug, Default)]
pub struct VirtualFileSystem {
    state: State,
}

impl VirtualFileSystem {
    /// Take ownership of `snapshot`.
    ///
    /// Fails with [`Error::Corrupt`] unless the snapshot has exactly one
    /// root directory reachable at `/`.
    pub fn new(snapshot: Snapshot) -> Result<Self> {
        if !snapshot.has_valid_root() {
            return Err(Error::Corrupt("snapshot has no unique root directory"));
        }
        debug!(
            "vfs: {} directories, {} files",
            snapshot.dir_entries.len(),
            snapshot.file_entries.len()
        );
        Ok(Self {
            state: State::Ready {
                snapshot,
                cwd: Path::root(),
            },
        })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, State::Disposed)
    }

    fn ready(&self) -> Result<(&Snapshot, &Path)> {
        match &self.state {
            State::Ready { snapshot, cwd } => Ok((snapshot, cwd)),
            _ => Err(Error::Disposed),
        }
    }

    fn read_only(&self, what: &'static str) -> Result<()> {
        self.ready()?;
        Err(Error::NotImplemented(what))
    }
}

impl FileSystem for VirtualFileSystem {
    fn open_file(&mut self, path: &Path, mode: FileMode, access: FileAccess) -> Result<StreamHandle> {
        let (snapshot, cwd) = self.ready()?;
        if mode != FileMode::Open || access != FileAccess::Read {
            return Err(Error::Unsupported("snapshot filesystems only open existing files for reading"));
        }

        let full = cwd.resolve(path);
        let not_found = || Error::FileNotFound(full.clone());
        let index = *snapshot.file_map.get(&full).ok_or_else(not_found)?;
        let entry = snapshot.file_entries.get(index).ok_or_else(not_found)?;
        entry.stream.clone().ok_or_else(not_found)
    }

    fn create_file(&mut self, _path: &Path) -> Result<()> {
        self.read_only("snapshot filesystems are read-only")
    }

    fn remove_file(&mut self, _path: &Path) -> Result<()> {
        self.read_only("snapshot filesystems are read-only")
    }

    fn create_directory(&mut self, _path: &Path) -> Result<()> {
        self.read_only("snapshot filesystems are read-only")
    }

    fn remove_directory(&mut self, _path: &Path) -> Result<()> {
        self.read_only("snapshot filesystems are read-only")
    }

    fn get_working_directory(&self) -> Result<Path> {
        Ok(self.ready()?.1.clone())
    }

    fn set_working_directory(&mut self, path: &Path) -> Result<()> {
        match &mut self.state {
            State::Ready { cwd, .. } => {
                *cwd = cwd.resolve(path);
                Ok(())
            }
            _ => Err(Error::Disposed),
        }
    }

    fn get_directory_listing(&self, path: &Path) -> Result<DirectoryListing> {
        let (snapshot, cwd) = self.ready()?;
        let full = cwd.resolve(path);
        snapshot
            .dir_map
            .get(&full)
            .and_then(|&index| snapshot.dir_entries.get(index))
            .filter(|entry| entry.path == full)
            .cloned()
            .ok_or(Error::DirectoryNotFound(full))
    }

    fn dispose(&mut self) {
        self.state = State::Disposed;
    }
}
