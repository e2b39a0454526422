//! A [`FileSystem`] over a directory on the host.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use log::debug;

use super::{DirectoryEntry, DirectoryListing, FileAccess, FileMode, FileSystem, Path};
use crate::io::{FileStream, SeekOrigin, Stream, StreamHandle, shared};
use crate::{Error, Result};

/// Maps virtual paths onto a host directory.
///
/// Every path resolves under the root; `..` cannot climb above it because
/// [`Path`] drops `..` at the root during normalization.
#[derive(Debug, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
    cwd: Path,
}

impl LocalFileSystem {
    /// Serve the existing directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }
        debug!("local filesystem rooted at {}", root.display());
        Ok(Self {
            root: Some(root),
            cwd: Path::root(),
        })
    }

    fn resolve(&self, path: &Path) -> Result<(Path, PathBuf)> {
        let root = self.root.as_ref().ok_or(Error::Disposed)?;
        let full = self.cwd.resolve(path);
        let mut host = root.clone();
        host.extend(full.segments());
        Ok((full, host))
    }
}

fn open_options(mode: FileMode, access: FileAccess) -> Result<OpenOptions> {
    let (read, write) = match access {
        FileAccess::Read => (true, false),
        FileAccess::Write => (false, true),
        FileAccess::ReadWrite => (true, true),
    };
    if !write && mode != FileMode::Open {
        return Err(Error::Unsupported("this file mode needs write access"));
    }

    let mut options = OpenOptions::new();
    options.read(read).write(write);
    match mode {
        FileMode::CreateNew => options.create_new(true),
        FileMode::Create => options.create(true).truncate(true),
        FileMode::Open => &mut options,
        FileMode::OpenOrCreate | FileMode::Append => options.create(true),
        FileMode::Truncate => options.truncate(true),
    };
    Ok(options)
}

fn file_error(full: Path) -> impl FnOnce(io::Error) -> Error {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(full),
        _ => Error::Io(e),
    }
}

fn dir_error(full: Path) -> impl FnOnce(io::Error) -> Error {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => Error::DirectoryNotFound(full),
        _ => Error::Io(e),
    }
}

impl FileSystem for LocalFileSystem {
    fn open_file(&mut self, path: &Path, mode: FileMode, access: FileAccess) -> Result<StreamHandle> {
        let (full, host) = self.resolve(path)?;
        let options = open_options(mode, access)?;
        let file = options.open(&host).map_err(file_error(full))?;
        let mut stream = FileStream::from_file(
            file,
            access != FileAccess::Write,
            access != FileAccess::Read,
        );
        if mode == FileMode::Append {
            stream.seek(0, SeekOrigin::End)?;
        }
        Ok(shared(stream))
    }

    fn create_file(&mut self, path: &Path) -> Result<()> {
        let (full, host) = self.resolve(path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&host)
            .map_err(file_error(full))?;
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        let (full, host) = self.resolve(path)?;
        fs::remove_file(&host).map_err(file_error(full))
    }

    fn create_directory(&mut self, path: &Path) -> Result<()> {
        let (full, host) = self.resolve(path)?;
        fs::create_dir_all(&host).map_err(dir_error(full))
    }

    fn remove_directory(&mut self, path: &Path) -> Result<()> {
        let (full, host) = self.resolve(path)?;
        fs::remove_dir_all(&host).map_err(dir_error(full))
    }

    fn get_working_directory(&self) -> Result<Path> {
        self.root.as_ref().ok_or(Error::Disposed)?;
        Ok(self.cwd.clone())
    }

    fn set_working_directory(&mut self, path: &Path) -> Result<()> {
        let (full, host) = self.resolve(path)?;
        if !host.is_dir() {
            return Err(Error::DirectoryNotFound(full));
        }
        self.cwd = full;
        Ok(())
    }

    fn get_directory_listing(&self, path: &Path) -> Result<DirectoryListing> {
        let (full, host) = self.resolve(path)?;
        let mut listing = DirectoryEntry::new(full.clone());
        for entry in fs::read_dir(&host).map_err(dir_error(full))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                listing.dir_names.push(name);
            } else {
                listing.file_names.push(name);
            }
        }
        listing.dir_names.sort();
        listing.file_names.sort();
        Ok(listing)
    }

    fn dispose(&mut self) {
        *self = Self::default();
    }
}
