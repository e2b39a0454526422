//! Growable in-memory stream.

use super::{SeekOrigin, Stream, resolve_seek};
use crate::{Error, Result};

/// A stream over an owned, growable byte buffer.
///
/// The position may be moved past the end; a subsequent write zero-fills the
/// gap. A zero-length `MemoryStream` is the placeholder used for empty
/// archive entries.
#[derive(Debug)]
pub struct MemoryStream {
    data: Vec<u8>,
    position: u64,
    writable: bool,
    open: bool,
}

impl Default for MemoryStream {
    /// A disposed stream. Use [`MemoryStream::new`] for an empty open one.
    fn default() -> Self {
        Self {
            data: Vec::new(),
            position: 0,
            writable: false,
            open: false,
        }
    }
}

impl MemoryStream {
    /// An empty, writable stream.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// A writable stream over `data`, positioned at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            writable: true,
            open: true,
        }
    }

    /// A stream over `data` that rejects writes and resizing.
    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            writable: false,
            ..Self::from_vec(data)
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn check_open(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(Error::Disposed) }
    }
}

impl Stream for MemoryStream {
    fn can_read(&self) -> bool {
        self.open
    }

    fn can_write(&self) -> bool {
        self.open && self.writable
    }

    fn can_seek(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let len = self.data.len() as u64;
        if self.position >= len {
            return Ok(0);
        }
        let start = self.position as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.writable {
            return Err(Error::Unsupported("memory stream is read-only"));
        }
        let start = usize::try_from(self.position).map_err(|_| Error::OutOfRange)?;
        let end = start.checked_add(buf.len()).ok_or(Error::OutOfRange)?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.check_open()?;
        self.position = resolve_seek(offset, origin, self.position, self.data.len() as u64)?;
        Ok(self.position)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_length(&mut self, length: u64) -> Result<()> {
        self.check_open()?;
        if !self.writable {
            return Err(Error::Unsupported("memory stream is read-only"));
        }
        let length = usize::try_from(length).map_err(|_| Error::OutOfRange)?;
        self.data.resize(length, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()
    }

    fn dispose(&mut self) {
        *self = Self::default();
    }
}
