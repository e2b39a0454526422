//! Fixed window into a base stream.

use std::io;

use log::trace;

use super::{SeekOrigin, Stream, StreamHandle, resolve_seek, seek_offset};
use crate::{Error, Result};

/// A bounded view of `length` bytes starting at `offset` in a base stream.
///
/// The view keeps its own position and seeks the base only when the base is
/// somewhere else, so several views may share one base and a view over an
/// unseekable base still reads front to back.
#[derive(Default)]
pub struct SubStream {
    base: Option<StreamHandle>,
    offset: u64,
    length: u64,
    position: u64,
}

impl SubStream {
    /// Create a view of `base[offset..offset + length]`.
    ///
    /// Fails with [`Error::OutOfRange`] if the window does not lie inside the
    /// base stream.
    pub fn new(base: StreamHandle, offset: u64, length: u64) -> Result<Self> {
        let base_len = base.borrow().length();
        let end = offset.checked_add(length).ok_or(Error::OutOfRange)?;
        if end > base_len {
            return Err(Error::OutOfRange);
        }
        Ok(Self {
            base: Some(base),
            offset,
            length,
            position: 0,
        })
    }

    fn base(&self) -> Result<&StreamHandle> {
        self.base.as_ref().ok_or(Error::Disposed)
    }

    /// Move the base to the view position unless it is already there.
    fn reposition(&self, base: &mut dyn Stream) -> Result<()> {
        let target = self.offset.checked_add(self.position).ok_or(Error::OutOfRange)?;
        if base.position() == target {
            return Ok(());
        }
        if !base.can_seek() {
            return Err(io::Error::other("base stream must be repositioned but cannot seek").into());
        }
        trace!("sub: seeking base to {target:#x}");
        base.seek(seek_offset(target)?, SeekOrigin::Begin)?;
        Ok(())
    }

    /// Bytes left between the position and the window end, capped at `want`.
    fn clamp(&self, want: usize) -> usize {
        let left = self.length.saturating_sub(self.position);
        want.min(usize::try_from(left).unwrap_or(usize::MAX))
    }
}

impl Stream for SubStream {
    fn can_read(&self) -> bool {
        self.base.as_ref().is_some_and(|b| b.borrow().can_read())
    }

    fn can_write(&self) -> bool {
        self.base.as_ref().is_some_and(|b| b.borrow().can_write())
    }

    fn can_seek(&self) -> bool {
        self.base.as_ref().is_some_and(|b| b.borrow().can_seek())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.clamp(buf.len());
        let mut base = self.base()?.borrow_mut();
        if !base.can_read() {
            return Err(Error::Unsupported("base stream is not readable"));
        }
        if n == 0 {
            return Ok(0);
        }
        self.reposition(&mut *base)?;
        let read = base.read(&mut buf[..n])?;
        drop(base);
        self.position += read as u64;
        Ok(read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.clamp(buf.len());
        let mut base = self.base()?.borrow_mut();
        if !base.can_write() {
            return Err(Error::Unsupported("base stream is not writable"));
        }
        if n == 0 {
            return Ok(0);
        }
        self.reposition(&mut *base)?;
        let written = base.write(&buf[..n])?;
        drop(base);
        self.position += written as u64;
        Ok(written)
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        if !self.base()?.borrow().can_seek() {
            return Err(Error::Unsupported("base stream is not seekable"));
        }
        let target = resolve_seek(offset, origin, self.position, self.length)?;
        if target > self.length {
            return Err(Error::OutOfRange);
        }
        self.position = target;
        Ok(target)
    }

    fn length(&self) -> u64 {
        if self.base.is_some() { self.length } else { 0 }
    }

    fn position(&self) -> u64 {
        if self.base.is_some() { self.position } else { 0 }
    }

    fn set_length(&mut self, _length: u64) -> Result<()> {
        self.base()?;
        Err(Error::NotImplemented("a bounded view has a fixed length"))
    }

    fn flush(&mut self) -> Result<()> {
        self.base()?.borrow_mut().flush()
    }

    fn dispose(&mut self) {
        *self = Self::default();
    }
}
