//! Several streams presented as one contiguous stream.
//!
//! Used for images whose logical content is split across files or regions,
//! e.g. a CIA content stitched back to back, or split SD card dumps.
//!
//! ## Positioning protocol
//! Each constituent keeps the position the last transfer left it at. Before
//! touching a constituent the concatenation compares that position with the
//! local offset it needs and seeks only on mismatch. Backing streams may be
//! expensive to seek or may not support it at all; purely sequential access
//! never issues a seek.

use std::io;

use log::trace;

use super::{SeekOrigin, Stream, StreamHandle, seek_offset};
use crate::{Error, Result};

struct Segment {
    stream: StreamHandle,
    /// Global offset of the first byte.
    start: u64,
    size: u64,
}

/// Concatenation of an ordered list of streams.
#[derive(Default)]
pub struct ConcatenatedStream {
    /// Non-empty constituents only; zero-length streams never receive calls.
    segments: Vec<Segment>,
    length: u64,
    position: u64,
    readable: bool,
    writable: bool,
    seekable: bool,
}

impl ConcatenatedStream {
    /// Concatenate `streams` in order.
    ///
    /// The result is readable only if every constituent is readable, and
    /// likewise for writing and seeking. Fails with [`Error::Unsupported`]
    /// if the list is empty, if the combined stream can neither be read nor
    /// written, or if the combined length is zero.
    pub fn new(streams: Vec<StreamHandle>) -> Result<Self> {
        if streams.is_empty() {
            return Err(Error::Unsupported("no streams to concatenate"));
        }

        let mut readable = true;
        let mut writable = true;
        let mut seekable = true;
        let mut segments = Vec::with_capacity(streams.len());
        let mut length = 0u64;
        for stream in streams {
            let size = {
                let s = stream.borrow();
                readable &= s.can_read();
                writable &= s.can_write();
                seekable &= s.can_seek();
                s.length()
            };
            if size == 0 {
                continue;
            }
            segments.push(Segment {
                stream,
                start: length,
                size,
            });
            length = length.checked_add(size).ok_or(Error::OutOfRange)?;
        }

        if !readable && !writable {
            return Err(Error::Unsupported(
                "concatenated streams are neither readable nor writable",
            ));
        }
        if length == 0 {
            return Err(Error::Unsupported("concatenated streams are all empty"));
        }

        Ok(Self {
            segments,
            length,
            position: 0,
            readable,
            writable,
            seekable,
        })
    }

    /// Number of non-empty constituents.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn check_open(&self) -> Result<()> {
        if self.segments.is_empty() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Segment index and local offset owning global `pos`. The end of the
    /// stream maps to the end of the last segment.
    fn locate(&self, pos: u64) -> (usize, u64) {
        if pos >= self.length {
            let last = self.segments.len() - 1;
            return (last, self.segments[last].size);
        }
        let idx = self.segments.partition_point(|s| s.start <= pos) - 1;
        (idx, pos - self.segments[idx].start)
    }

    /// Bring `stream` to `local` unless it is already there.
    fn reposition(stream: &mut dyn Stream, index: usize, local: u64) -> Result<()> {
        if stream.position() == local {
            return Ok(());
        }
        if !stream.can_seek() {
            return Err(io::Error::other("constituent stream must be repositioned but cannot seek").into());
        }
        trace!("concat: seeking segment {index} to {local:#x}");
        stream.seek(seek_offset(local)?, SeekOrigin::Begin)?;
        Ok(())
    }

    /// Run `op(stream, done, want)` over consecutive segments until `len`
    /// bytes have moved. On error the position is restored and nothing is
    /// reported as transferred.
    fn transfer<F>(&mut self, len: usize, mut op: F) -> Result<usize>
    where
        F: FnMut(&mut dyn Stream, usize, usize) -> Result<usize>,
    {
        let start = self.position;
        let result = self.transfer_segments(len, &mut op);
        if result.is_err() {
            self.position = start;
        }
        result
    }

    fn transfer_segments<F>(&mut self, len: usize, op: &mut F) -> Result<usize>
    where
        F: FnMut(&mut dyn Stream, usize, usize) -> Result<usize>,
    {
        if len == 0 || self.position >= self.length {
            return Ok(0);
        }

        let (mut idx, _) = self.locate(self.position);
        let mut done = 0usize;
        while done < len && idx < self.segments.len() {
            let (seg_start, seg_size) = (self.segments[idx].start, self.segments[idx].size);
            let local = self.position - seg_start;
            if local >= seg_size {
                idx += 1;
                continue;
            }
            let left = usize::try_from(seg_size - local).unwrap_or(usize::MAX);
            let want = (len - done).min(left);

            let n = {
                let mut stream = self.segments[idx].stream.borrow_mut();
                Self::reposition(&mut *stream, idx, local)?;
                op(&mut *stream, done, want)?
            };
            if n == 0 {
                break;
            }
            done += n;
            self.position += n as u64;
            if local + n as u64 >= seg_size {
                idx += 1;
            }
        }
        Ok(done)
    }
}

impl Stream for ConcatenatedStream {
    fn can_read(&self) -> bool {
        !self.segments.is_empty() && self.readable
    }

    fn can_write(&self) -> bool {
        !self.segments.is_empty() && self.writable
    }

    fn can_seek(&self) -> bool {
        !self.segments.is_empty() && self.seekable
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if !self.readable {
            return Err(Error::Unsupported("a constituent stream is not readable"));
        }
        self.transfer(buf.len(), |s, done, want| s.read(&mut buf[done..done + want]))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.writable {
            return Err(Error::Unsupported("a constituent stream is not writable"));
        }
        self.transfer(buf.len(), |s, done, want| s.write(&buf[done..done + want]))
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.check_open()?;
        if !self.seekable {
            return Err(Error::Unsupported("a constituent stream is not seekable"));
        }
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => self.position as i128,
            SeekOrigin::End => self.length as i128,
        };
        let target = (base + offset as i128).clamp(0, self.length as i128) as u64;

        let (idx, local) = self.locate(target);
        {
            let mut stream = self.segments[idx].stream.borrow_mut();
            Self::reposition(&mut *stream, idx, local)?;
        }
        self.position = target;
        Ok(target)
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_length(&mut self, _length: u64) -> Result<()> {
        Err(Error::NotImplemented("cannot resize a concatenated stream"))
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        for seg in &self.segments {
            seg.stream.borrow_mut().flush()?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::io::testing::{Call, TrackingStream};
    use crate::io::{MemoryStream, shared};

    const SEG: usize = 0x100;

    fn tracked(n: usize) -> (Vec<Rc<RefCell<TrackingStream>>>, ConcatenatedStream) {
        let raw: Vec<_> = (0..n)
            .map(|i| Rc::new(RefCell::new(TrackingStream::new(SEG, i as u8))))
            .collect();
        let handles: Vec<StreamHandle> = raw.iter().map(|r| r.clone() as StreamHandle).collect();
        let concat = ConcatenatedStream::new(handles).unwrap();
        (raw, concat)
    }

    fn clear(raw: &[Rc<RefCell<TrackingStream>>]) {
        for r in raw {
            r.borrow().calls.borrow_mut().clear();
        }
    }

    fn seek_counts(raw: &[Rc<RefCell<TrackingStream>>]) -> Vec<usize> {
        raw.iter().map(|r| r.borrow().seeks().len()).collect()
    }

    #[test]
    fn seek_clamps_and_targets_one_constituent() {
        let (raw, mut concat) = tracked(8);
        let total = (8 * SEG) as u64;
        assert_eq!(concat.length(), total);

        assert_eq!(concat.seek(-5, SeekOrigin::Begin).unwrap(), 0);
        assert_eq!(seek_counts(&raw), vec![0; 8]);

        assert_eq!(concat.seek(0x250, SeekOrigin::Begin).unwrap(), 0x250);
        assert_eq!(seek_counts(&raw), vec![0, 0, 1, 0, 0, 0, 0, 0]);
        assert_eq!(raw[2].borrow().seeks(), vec![Call::Seek(0x50, SeekOrigin::Begin)]);

        // Already positioned there: no further calls.
        clear(&raw);
        assert_eq!(concat.seek(0x250, SeekOrigin::Begin).unwrap(), 0x250);
        assert_eq!(seek_counts(&raw), vec![0; 8]);

        // Boundary: constituent 3 is still at its local 0.
        assert_eq!(concat.seek(0x300, SeekOrigin::Begin).unwrap(), 0x300);
        assert_eq!(seek_counts(&raw), vec![0; 8]);

        assert_eq!(concat.seek(0x2FF, SeekOrigin::Begin).unwrap(), 0x2FF);
        assert_eq!(raw[2].borrow().seeks(), vec![Call::Seek(0xFF, SeekOrigin::Begin)]);

        clear(&raw);
        assert_eq!(concat.seek(i64::MAX, SeekOrigin::Begin).unwrap(), total);
        assert_eq!(seek_counts(&raw), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(raw[7].borrow().seeks(), vec![Call::Seek(SEG as i64, SeekOrigin::Begin)]);

        assert_eq!(concat.seek(-0x10, SeekOrigin::Current).unwrap(), total - 0x10);
        assert_eq!(concat.seek(-0x1000, SeekOrigin::End).unwrap(), 0);
    }

    #[test]
    fn sequential_read_crosses_boundaries_without_seeking() {
        let (raw, mut concat) = tracked(3);
        let mut buf = vec![0u8; 3 * SEG];
        assert_eq!(concat.read(&mut buf).unwrap(), 3 * SEG);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[SEG], 1);
        assert_eq!(buf[3 * SEG - 1], 2);
        assert_eq!(seek_counts(&raw), vec![0; 3]);
        assert_eq!(concat.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_after_jump_repositions_once() {
        let (raw, mut concat) = tracked(4);
        concat.seek(0x80, SeekOrigin::Begin).unwrap();
        clear(&raw);

        let mut buf = vec![0u8; 0x180];
        assert_eq!(concat.read(&mut buf).unwrap(), 0x180);
        assert!(buf[..0x80].iter().all(|&b| b == 0));
        assert!(buf[0x80..].iter().all(|&b| b == 1));
        assert_eq!(seek_counts(&raw), vec![0; 4]);
        assert_eq!(concat.position(), 0x200);

        // Constituent 0 was left at its end; going back needs one seek.
        concat.seek(0x10, SeekOrigin::Begin).unwrap();
        assert_eq!(raw[0].borrow().seeks(), vec![Call::Seek(0x10, SeekOrigin::Begin)]);
    }

    #[test]
    fn write_spans_constituents() {
        let a = shared(MemoryStream::from_vec(vec![0; 4]));
        let b = shared(MemoryStream::from_vec(vec![0; 4]));
        let mut concat = ConcatenatedStream::new(vec![a.clone(), b.clone()]).unwrap();
        concat.seek(2, SeekOrigin::Begin).unwrap();
        assert_eq!(concat.write(&[1, 2, 3, 4, 5, 6, 7]).unwrap(), 6);

        let mut out = [0u8; 4];
        crate::io::read_exact_at(&mut *a.borrow_mut(), 0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 1, 2]);
        crate::io::read_exact_at(&mut *b.borrow_mut(), 0, &mut out).unwrap();
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn zero_length_constituents_are_skipped() {
        let empty = Rc::new(RefCell::new(TrackingStream::new(0, 0)));
        let full = shared(MemoryStream::from_vec(vec![7; 4]));
        let mut concat =
            ConcatenatedStream::new(vec![empty.clone() as StreamHandle, full, empty.clone() as StreamHandle])
                .unwrap();
        assert_eq!(concat.segment_count(), 1);

        let mut buf = [0u8; 8];
        assert_eq!(concat.read(&mut buf).unwrap(), 4);
        concat.seek(0, SeekOrigin::Begin).unwrap();
        assert!(empty.borrow().calls.borrow().is_empty());
    }

    #[test]
    fn required_seek_on_unseekable_constituent_fails_whole_call() {
        let a = Rc::new(RefCell::new(TrackingStream::new(4, 1)));
        let b = Rc::new(RefCell::new(TrackingStream::new(4, 2)));
        b.borrow_mut().seekable = false;
        let mut concat =
            ConcatenatedStream::new(vec![a.clone() as StreamHandle, b.clone() as StreamHandle]).unwrap();
        assert!(!concat.can_seek());

        // Somebody else moved the shared constituent.
        b.borrow_mut().pos = 3;
        let mut buf = [0u8; 8];
        assert!(matches!(concat.read(&mut buf), Err(Error::Io(_))));
        assert_eq!(concat.position(), 0);
        assert!(matches!(concat.seek(0, SeekOrigin::Begin), Err(Error::Unsupported(_))));
    }

    #[test]
    fn capabilities_are_the_intersection() {
        let ro = Rc::new(RefCell::new(TrackingStream::new(4, 0)));
        ro.borrow_mut().readable = false;
        let rw = shared(MemoryStream::from_vec(vec![0; 4]));
        let concat = ConcatenatedStream::new(vec![ro as StreamHandle, rw]).unwrap();
        assert!(!concat.can_read());
        assert!(concat.can_write());
        assert!(concat.can_seek());
    }

    #[test]
    fn construction_rejects_unusable_lists() {
        assert!(matches!(ConcatenatedStream::new(vec![]), Err(Error::Unsupported(_))));

        let dead = Rc::new(RefCell::new(TrackingStream::new(4, 0)));
        dead.borrow_mut().readable = false;
        dead.borrow_mut().writable = false;
        assert!(matches!(
            ConcatenatedStream::new(vec![dead as StreamHandle]),
            Err(Error::Unsupported(_))
        ));

        let empty = shared(MemoryStream::new());
        assert!(matches!(
            ConcatenatedStream::new(vec![empty]),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn take_leaves_source_incapable() {
        let (_raw, mut concat) = tracked(2);
        let moved = std::mem::take(&mut concat);
        assert_eq!(moved.length(), (2 * SEG) as u64);
        assert_eq!(concat.length(), 0);
        assert!(!concat.can_read() && !concat.can_write() && !concat.can_seek());
        assert!(matches!(concat.read(&mut [0u8; 1]), Err(Error::Disposed)));
        assert!(matches!(concat.set_length(1), Err(Error::NotImplemented(_))));
    }
}
