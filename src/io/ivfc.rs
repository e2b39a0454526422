//! IVFC hash tree (3DS RomFS integrity layer).
//!
//! ## Header (0x5C bytes, little endian)
//! ```text
//! [0x00] Magic "IVFC"                 (4 bytes)
//! [0x04] Magic ID (0x10000)           (u32)
//! [0x08] MasterHashSize               (u32)
//! [0x0C] Level 1 descriptor           (0x18 bytes)
//! [0x24] Level 2 descriptor           (0x18 bytes)
//! [0x3C] Level 3 descriptor           (0x18 bytes)
//! [0x54] OptionalInfoSize             (u32)
//! [0x58] Reserved                     (u32)
//! ```
//!
//! ## Level descriptor (0x18 bytes)
//! ```text
//! [0x00] LogicalOffset                (u64)
//! [0x08] HashDataSize                 (u64)
//! [0x10] BlockSize (log2)             (u32)
//! [0x14] Reserved                     (u32)
//! ```
//!
//! ## Physical layout
//! ```text
//! [0x60]                                   master hash (hashes of level 1 blocks)
//! [align(0x60 + master, 1 << L3.log2)]     level 3 = RomFS data
//! [align(level 3 end, 1 << L1.log2)]       level 1 (hashes of level 2 blocks)
//! [align(level 1 end, 1 << L2.log2)]       level 2 (hashes of level 3 blocks)
//! ```
//! Each hash is a SHA-256 over one block of the next level; the final block
//! of a level is hashed zero-padded to the full block size.

use std::io::Cursor;

use log::{debug, warn};

use super::{SeekOrigin, Stream, StreamHandle, SubStream, read_exact_at, read_vec_at};
use crate::crypto::{SHA256_SIZE, ValidState, sha256};
use crate::utils::{align_up, bytesa, le_u32, le_u64, magic};
use crate::{Error, Result};

/// Offset of the master hash, right after the (0x10-aligned) header.
pub const MASTER_HASH_OFFSET: u64 = 0x60;

const IVFC_MAGIC_ID: u32 = 0x10000;

/// One level descriptor from the IVFC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfcLevel {
    /// Offset in the IVFC logical address space (informational).
    pub logical_offset: u64,
    /// Size of the level's data in bytes.
    pub size: u64,
    /// log2 of the block size used to hash this level.
    pub block_size_log2: u32,
}

impl IvfcLevel {
    pub fn block_size(&self) -> u64 {
        1 << self.block_size_log2
    }
}

/// Parsed IVFC header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfcHeader {
    pub master_hash_size: u32,
    /// Levels 1, 2 and 3, in that order.
    pub levels: [IvfcLevel; 3],
    pub optional_info_size: u32,
}

impl IvfcHeader {
    /// Size of the on-disk header.
    pub const SIZE: usize = 0x5C;

    /// Parse an IVFC header from `r`, positioned at the magic.
    pub fn parse<R: std::io::Read>(r: &mut R) -> Result<Self> {
        magic(r, b"IVFC")?;
        if le_u32(r)? != IVFC_MAGIC_ID {
            return Err(Error::Corrupt("unexpected IVFC magic id"));
        }
        let master_hash_size = le_u32(r)?;

        let mut levels = [IvfcLevel {
            logical_offset: 0,
            size: 0,
            block_size_log2: 0,
        }; 3];
        for level in &mut levels {
            let logical_offset = le_u64(r)?;
            let size = le_u64(r)?;
            let block_size_log2 = le_u32(r)?;
            let _reserved = bytesa::<4>(r)?;
            if size == 0 {
                return Err(Error::Corrupt("IVFC level has zero size"));
            }
            if !(6..=31).contains(&block_size_log2) {
                return Err(Error::Corrupt("IVFC block size out of range"));
            }
            *level = IvfcLevel {
                logical_offset,
                size,
                block_size_log2,
            };
        }
        let optional_info_size = le_u32(r)?;

        Ok(Self {
            master_hash_size,
            levels,
            optional_info_size,
        })
    }

    /// Physical offsets of levels 1, 2 and 3 within the IVFC image.
    ///
    /// Fails with [`Error::Corrupt`] if the level sizes overflow the address
    /// space.
    pub fn level_offsets(&self) -> Result<[u64; 3]> {
        let [l1, l2, l3] = &self.levels;
        let l3_off = align_up(self.master_hash_end(), l3.block_size())?;
        let l1_off = align_up(end_of(l3_off, l3.size)?, l1.block_size())?;
        let l2_off = align_up(end_of(l1_off, l1.size)?, l2.block_size())?;
        Ok([l1_off, l2_off, l3_off])
    }

    /// Bytes the base stream must hold for every level to be present.
    pub fn image_size(&self) -> Result<u64> {
        let mut size = self.master_hash_end();
        for (off, level) in self.level_offsets()?.into_iter().zip(&self.levels) {
            size = size.max(end_of(off, level.size)?);
        }
        Ok(size)
    }

    fn master_hash_end(&self) -> u64 {
        MASTER_HASH_OFFSET + self.master_hash_size as u64
    }
}

fn end_of(offset: u64, size: u64) -> Result<u64> {
    offset
        .checked_add(size)
        .ok_or(Error::Corrupt("offset arithmetic overflows"))
}

struct IvfcState {
    base: StreamHandle,
    header: IvfcHeader,
    offsets: [u64; 3],
    data: SubStream,
}

/// Exposes level 3 of an IVFC image as a read-only stream.
///
/// Hashes are only checked when [`IvfcStream::verify`] is called.
#[derive(Default)]
pub struct IvfcStream {
    state: Option<IvfcState>,
}

impl IvfcStream {
    /// Parse the IVFC header at the start of `base` and map its levels.
    pub fn new(base: StreamHandle) -> Result<Self> {
        let raw = read_vec_at(&mut *base.borrow_mut(), 0, IvfcHeader::SIZE)?;
        let header = IvfcHeader::parse(&mut Cursor::new(raw))?;
        let offsets = header.level_offsets()?;

        if header.image_size()? > base.borrow().length() {
            return Err(Error::OutOfRange);
        }
        debug!(
            "ivfc: master hash {:#x} bytes, levels at {:#x}/{:#x}/{:#x}, data size {:#x}",
            header.master_hash_size, offsets[0], offsets[1], offsets[2], header.levels[2].size
        );

        let data = SubStream::new(base.clone(), offsets[2], header.levels[2].size)?;
        Ok(Self {
            state: Some(IvfcState {
                base,
                header,
                offsets,
                data,
            }),
        })
    }

    pub fn header(&self) -> Option<&IvfcHeader> {
        self.state.as_ref().map(|s| &s.header)
    }

    fn state(&self) -> Result<&IvfcState> {
        self.state.as_ref().ok_or(Error::Disposed)
    }

    fn data(&mut self) -> Result<&mut SubStream> {
        self.state.as_mut().map(|s| &mut s.data).ok_or(Error::Disposed)
    }

    /// Check every level against the level above it.
    ///
    /// Returns the result for levels 1, 2 and 3. A mismatch in one level
    /// does not stop the others from being checked.
    pub fn verify(&self) -> Result<[ValidState; 3]> {
        let state = self.state()?;
        let mut base = state.base.borrow_mut();
        let mut results = [ValidState::Unchecked; 3];

        for (i, result) in results.iter_mut().enumerate() {
            let (hash_off, hash_len) = if i == 0 {
                (MASTER_HASH_OFFSET, state.header.master_hash_size as u64)
            } else {
                (state.offsets[i - 1], state.header.levels[i - 1].size)
            };
            let hashes = read_vec_at(&mut *base, hash_off, to_usize(hash_len)?)?;

            let level = &state.header.levels[i];
            let block_size = level.block_size();
            let mut block = vec![0u8; to_usize(block_size)?];
            let mut good = true;
            for (index, start) in (0..level.size).step_by(to_usize(block_size)?).enumerate() {
                let len = to_usize((level.size - start).min(block_size))?;
                block.fill(0);
                read_exact_at(&mut *base, state.offsets[i] + start, &mut block[..len])?;

                let expected = hashes.get(index * SHA256_SIZE..(index + 1) * SHA256_SIZE);
                if expected != Some(&sha256(&block)[..]) {
                    good = false;
                    break;
                }
            }

            *result = ValidState::from_match(good);
            if !good {
                warn!("ivfc: level {} failed hash verification", i + 1);
            }
        }
        Ok(results)
    }
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::OutOfRange)
}

impl Stream for IvfcStream {
    fn can_read(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.data.can_read())
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.data.can_seek())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.data()?.read(buf)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        self.state()?;
        Err(Error::NotImplemented("IVFC streams are read-only"))
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.data()?.seek(offset, origin)
    }

    fn length(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.data.length())
    }

    fn position(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.data.position())
    }

    fn set_length(&mut self, _length: u64) -> Result<()> {
        self.state()?;
        Err(Error::NotImplemented("IVFC streams are read-only"))
    }

    fn flush(&mut self) -> Result<()> {
        self.state()?;
        Ok(())
    }

    fn dispose(&mut self) {
        self.state = None;
    }
}

/// Test helper: build a complete IVFC image around `data`.
#[cfg(test)]
pub(crate) fn build_image(data: &[u8], log2: u32) -> Vec<u8> {
    let block = 1usize << log2;
    let hash_level = |level: &[u8]| -> Vec<u8> {
        level
            .chunks(block)
            .flat_map(|c| {
                let mut padded = c.to_vec();
                padded.resize(block, 0);
                sha256(&padded)
            })
            .collect()
    };
    let l3 = data.to_vec();
    let l2 = hash_level(&l3);
    let l1 = hash_level(&l2);
    let master = hash_level(&l1);

    let mut header = Vec::with_capacity(0x60);
    header.extend_from_slice(b"IVFC");
    header.extend_from_slice(&IVFC_MAGIC_ID.to_le_bytes());
    header.extend_from_slice(&(master.len() as u32).to_le_bytes());
    let mut logical = 0u64;
    for level in [&l1, &l2, &l3] {
        header.extend_from_slice(&logical.to_le_bytes());
        header.extend_from_slice(&(level.len() as u64).to_le_bytes());
        header.extend_from_slice(&log2.to_le_bytes());
        header.extend_from_slice(&[0; 4]);
        logical = (logical + level.len() as u64).next_multiple_of(block as u64);
    }
    header.extend_from_slice(&0u32.to_le_bytes());
    header.resize(MASTER_HASH_OFFSET as usize, 0);

    let mut image = header;
    image.extend_from_slice(&master);
    for level in [&l3, &l1, &l2] {
        image.resize(image.len().next_multiple_of(block), 0);
        image.extend_from_slice(level);
    }
    image
}
