//! Host-file stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{SeekOrigin, Stream, resolve_seek};
use crate::{Error, Result};

/// A [`Stream`] over a [`std::fs::File`].
#[derive(Debug, Default)]
pub struct FileStream {
    file: Option<File>,
    position: u64,
    readable: bool,
    writable: bool,
}

impl FileStream {
    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_file(file, true, false))
    }

    /// Open a file with explicit options. The capabilities are taken from
    /// the `read`/`write` flags the caller used to build `options`.
    pub fn with_options(
        path: impl AsRef<Path>,
        options: &OpenOptions,
        readable: bool,
        writable: bool,
    ) -> Result<Self> {
        let file = options.open(path)?;
        Ok(Self::from_file(file, readable, writable))
    }

    /// Wrap an already-open file, positioned at its start.
    pub fn from_file(file: File, readable: bool, writable: bool) -> Self {
        Self {
            file: Some(file),
            position: 0,
            readable,
            writable,
        }
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::Disposed)
    }
}

impl Stream for FileStream {
    fn can_read(&self) -> bool {
        self.file.is_some() && self.readable
    }

    fn can_write(&self) -> bool {
        self.file.is_some() && self.writable
    }

    fn can_seek(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let readable = self.readable;
        let position = self.position;
        let file = self.file()?;
        if !readable {
            return Err(Error::Unsupported("file was not opened for reading"));
        }
        file.seek(SeekFrom::Start(position))?;
        let mut done = 0;
        while done < buf.len() {
            let n = file.read(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        self.position += done as u64;
        Ok(done)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let writable = self.writable;
        let position = self.position;
        let file = self.file()?;
        if !writable {
            return Err(Error::Unsupported("file was not opened for writing"));
        }
        file.seek(SeekFrom::Start(position))?;
        file.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.file()?;
        self.position = resolve_seek(offset, origin, self.position, self.length())?;
        Ok(self.position)
    }

    fn length(&self) -> u64 {
        self.file
            .as_ref()
            .and_then(|f| f.metadata().ok())
            .map_or(0, |m| m.len())
    }

    fn position(&self) -> u64 {
        if self.file.is_some() { self.position } else { 0 }
    }

    fn set_length(&mut self, length: u64) -> Result<()> {
        let writable = self.writable;
        let file = self.file()?;
        if !writable {
            return Err(Error::Unsupported("file was not opened for writing"));
        }
        file.set_len(length)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn dispose(&mut self) {
        *self = Self::default();
    }
}
