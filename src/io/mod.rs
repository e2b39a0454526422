//! Seekable byte streams and their decorators.
//!
//! Every container layer in a 3DS image is reached by stacking decorators on
//! top of one base stream:
//!
//! ```text
//! FileStream ──► SubStream ──► AesCtrStream ──► IvfcStream ──► RomFS snapshot
//!  (image)      (NCCH region)  (section key)    (level 3)       (file views)
//! ```
//!
//! All decorators implement [`Stream`] and hold their base as a shared
//! [`StreamHandle`], so any number of views can outlive each other in any
//! order while the base stays valid.
//!
//! | Type | Role |
//! |------|------|
//! | [`MemoryStream`]       | growable in-memory buffer |
//! | [`FileStream`]         | host file |
//! | [`SubStream`]          | fixed window into a base |
//! | [`ConcatenatedStream`] | several streams presented back to back |
//! | [`AesCtrStream`]       | AES-128-CTR, read/write, random access |
//! | [`AesCbcStream`]       | AES-128-CBC, read-only, random access |
//! | [`IvfcStream`]         | IVFC hash tree; exposes the data level |

pub mod cbc;
pub mod concat;
pub mod ctr;
pub mod file;
pub mod ivfc;
pub mod memory;
pub mod sub;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::{Error, Result};

pub use cbc::AesCbcStream;
pub use concat::ConcatenatedStream;
pub use ctr::AesCtrStream;
pub use file::FileStream;
pub use ivfc::{IvfcHeader, IvfcStream};
pub use memory::MemoryStream;
pub use sub::SubStream;

/// Reference point for [`Stream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Relative to byte 0.
    Begin,
    /// Relative to the current position.
    Current,
    /// Relative to the stream length.
    End,
}

/// The capability contract shared by every stream in the crate.
///
/// A capability query returning `false` means the matching operation fails
/// with [`Error::Unsupported`]. A stream that was never initialized (or was
/// disposed) reports length 0, position 0 and no capabilities, and every
/// operation on it fails with [`Error::Disposed`].
pub trait Stream {
    fn can_read(&self) -> bool;
    fn can_write(&self) -> bool;
    fn can_seek(&self) -> bool;

    /// Read up to `buf.len()` bytes. Fewer bytes are returned only at the end
    /// of the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes. Fewer bytes are accepted only when the
    /// medium is exhausted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Move the position and return the new absolute position.
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    fn length(&self) -> u64;
    fn position(&self) -> u64;
    fn set_length(&mut self, length: u64) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    /// Release the stream's resources and enter the disposed state.
    fn dispose(&mut self);
}

/// Shared, type-erased handle to a stream.
pub type StreamHandle = Rc<RefCell<dyn Stream>>;

/// Wrap a concrete stream into a [`StreamHandle`].
pub fn shared<S: Stream + 'static>(stream: S) -> StreamHandle {
    Rc::new(RefCell::new(stream))
}

/// Resolve `(offset, origin)` against `position` and `length`.
///
/// Returns [`Error::OutOfRange`] if the result would be negative or does not
/// fit in an `i64`. Callers decide whether positions beyond `length` are
/// acceptable.
pub(crate) fn resolve_seek(offset: i64, origin: SeekOrigin, position: u64, length: u64) -> Result<u64> {
    let base = match origin {
        SeekOrigin::Begin => 0,
        SeekOrigin::Current => i64::try_from(position).map_err(|_| Error::OutOfRange)?,
        SeekOrigin::End => i64::try_from(length).map_err(|_| Error::OutOfRange)?,
    };
    let target = base.checked_add(offset).ok_or(Error::OutOfRange)?;
    u64::try_from(target).map_err(|_| Error::OutOfRange)
}

/// Convert an absolute position into a `Begin` seek offset.
pub(crate) fn seek_offset(position: u64) -> Result<i64> {
    i64::try_from(position).map_err(|_| Error::OutOfRange)
}

/// Read exactly `buf.len()` bytes starting at `offset`.
///
/// Returns [`Error::UnexpectedEof`] if the stream ends first.
pub fn read_exact_at(stream: &mut dyn Stream, offset: u64, buf: &mut [u8]) -> Result<()> {
    stream.seek(seek_offset(offset)?, SeekOrigin::Begin)?;
    let mut done = 0;
    while done < buf.len() {
        let n = stream.read(&mut buf[done..])?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
        done += n;
    }
    Ok(())
}

/// Read `len` bytes starting at `offset` into a new buffer.
pub fn read_vec_at(stream: &mut dyn Stream, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(stream, offset, &mut buf)?;
    Ok(buf)
}

/// Default block size used by [`copy_stream`].
pub const COPY_BLOCK_SIZE: usize = 0x10000;

/// Copy the whole of `src` (from position 0) to `dst` at its current position.
///
/// Returns the number of bytes copied. A zero-byte write before the source is
/// exhausted is reported as [`Error::Io`] with `WriteZero`.
pub fn copy_stream(src: &mut dyn Stream, dst: &mut dyn Stream, block_size: usize) -> Result<u64> {
    if !src.can_read() {
        return Err(Error::Unsupported("source stream is not readable"));
    }
    if !dst.can_write() {
        return Err(Error::Unsupported("destination stream is not writable"));
    }
    src.seek(0, SeekOrigin::Begin)?;

    let mut buf = vec![0u8; block_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut written = 0;
        while written < n {
            let w = dst.write(&buf[written..n])?;
            if w == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            written += w;
        }
        total += n as u64;
    }
    dst.flush()?;
    Ok(total)
}

/// Adapter exposing a [`StreamHandle`] through [`std::io::Read`],
/// [`std::io::Write`] and [`std::io::Seek`].
///
/// The stream is borrowed only for the duration of each call.
#[derive(Clone)]
pub struct IoStream {
    inner: StreamHandle,
}

impl IoStream {
    pub fn new(inner: StreamHandle) -> Self {
        Self { inner }
    }

    /// Consume the adapter, returning the wrapped handle.
    pub fn into_inner(self) -> StreamHandle {
        self.inner
    }
}

impl io::Read for IoStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.inner.borrow_mut().read(buf)?)
    }
}

impl io::Write for IoStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.inner.borrow_mut().write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.inner.borrow_mut().flush()?)
    }
}

impl io::Seek for IoStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, origin) = match pos {
            io::SeekFrom::Start(o) => (seek_offset(o)?, SeekOrigin::Begin),
            io::SeekFrom::Current(o) => (o, SeekOrigin::Current),
            io::SeekFrom::End(o) => (o, SeekOrigin::End),
        };
        Ok(self.inner.borrow_mut().seek(offset, origin)?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A stream that records every call it receives.

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{SeekOrigin, Stream};
    use crate::{Error, Result};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Read(usize),
        Write(usize),
        Seek(i64, SeekOrigin),
    }

    pub struct TrackingStream {
        pub data: Vec<u8>,
        pub pos: u64,
        pub readable: bool,
        pub writable: bool,
        pub seekable: bool,
        pub calls: Rc<RefCell<Vec<Call>>>,
    }

    impl TrackingStream {
        pub fn new(len: usize, fill: u8) -> Self {
            Self {
                data: vec![fill; len],
                pos: 0,
                readable: true,
                writable: true,
                seekable: true,
                calls: Rc::default(),
            }
        }

        pub fn seeks(&self) -> Vec<Call> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| matches!(c, Call::Seek(..)))
                .cloned()
                .collect()
        }
    }

    impl Stream for TrackingStream {
        fn can_read(&self) -> bool {
            self.readable
        }

        fn can_write(&self) -> bool {
            self.writable
        }

        fn can_seek(&self) -> bool {
            self.seekable
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.calls.borrow_mut().push(Call::Read(buf.len()));
            if !self.readable {
                return Err(Error::Unsupported("read"));
            }
            let start = (self.pos as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            self.pos += n as u64;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.calls.borrow_mut().push(Call::Write(buf.len()));
            if !self.writable {
                return Err(Error::Unsupported("write"));
            }
            let start = (self.pos as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            self.data[start..start + n].copy_from_slice(&buf[..n]);
            self.pos += n as u64;
            Ok(n)
        }

        fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
            self.calls.borrow_mut().push(Call::Seek(offset, origin));
            if !self.seekable {
                return Err(Error::Unsupported("seek"));
            }
            self.pos = super::resolve_seek(offset, origin, self.pos, self.data.len() as u64)?;
            Ok(self.pos)
        }

        fn length(&self) -> u64 {
            self.data.len() as u64
        }

        fn position(&self) -> u64 {
            self.pos
        }

        fn set_length(&mut self, _length: u64) -> Result<()> {
            Err(Error::NotImplemented("set_length"))
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn dispose(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;

    #[test]
    fn resolve_seek_rejects_negative_targets() {
        assert_eq!(resolve_seek(5, SeekOrigin::Begin, 0, 10).unwrap(), 5);
        assert_eq!(resolve_seek(-2, SeekOrigin::Current, 4, 10).unwrap(), 2);
        assert_eq!(resolve_seek(-3, SeekOrigin::End, 0, 10).unwrap(), 7);
        assert_eq!(resolve_seek(4, SeekOrigin::End, 0, 10).unwrap(), 14);
        assert!(matches!(
            resolve_seek(-1, SeekOrigin::Begin, 0, 10),
            Err(Error::OutOfRange)
        ));
    }

    #[test]
    fn read_exact_at_reports_eof() {
        let mut s = MemoryStream::from_vec((0u8..8).collect());
        let mut buf = [0u8; 4];
        read_exact_at(&mut s, 2, &mut buf).unwrap();
        assert_eq!(buf, [2, 3, 4, 5]);
        assert!(matches!(
            read_exact_at(&mut s, 6, &mut buf),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn copy_stream_copies_everything() {
        let mut src = MemoryStream::from_vec((0..=255u8).cycle().take(1000).collect());
        src.seek(500, SeekOrigin::Begin).unwrap();
        let mut dst = MemoryStream::new();
        let n = copy_stream(&mut src, &mut dst, 64).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(dst.as_slice(), src.as_slice());
    }

    #[test]
    fn io_adapter_round_trips() {
        let handle = shared(MemoryStream::new());
        let mut io = IoStream::new(handle.clone());
        io.write_all(b"hello world").unwrap();
        io.seek(SeekFrom::Start(6)).unwrap();
        let mut s = String::new();
        io.read_to_string(&mut s).unwrap();
        assert_eq!(s, "world");
        assert_eq!(handle.borrow().length(), 11);
    }
}
