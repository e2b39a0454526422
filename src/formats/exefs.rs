//! ExeFS (executable filesystem) - flat archive holding `.code`, `banner`,
//! `icon` and `logo`.
//!
//! ## Header (0x200 bytes)
//! ```text
//! [0x000] FileHeader[10]           (0x10 bytes each)
//! [0x0A0] Reserved                 (0x20 bytes)
//! [0x0C0] SHA-256[10]              (0x20 bytes each, reverse order)
//! [0x200] FileData
//! ```
//!
//! ## File header (0x10 bytes)
//! ```text
//! [0x00] Name   - NUL-padded ASCII (8 bytes)
//! [0x08] Offset - relative to FileData, 0x200-aligned (u32 LE)
//! [0x0C] Size   (u32 LE)
//! ```
//!
//! The digest for file slot `i` is stored in hash slot `9 - i`. Slots with an
//! all-zero name are unused.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::crypto::{SHA256_SIZE, ValidState};
use crate::io::{COPY_BLOCK_SIZE, MemoryStream, StreamHandle, SubStream, read_exact_at, read_vec_at, shared};
use crate::utils::{bytesa, le_u32, padded_ascii};
use crate::vfs::{Path, Snapshot};
use crate::{Error, Result};

/// Size of the header; file data offsets are relative to its end.
pub const HEADER_SIZE: u64 = 0x200;
/// Number of file slots in the header.
pub const MAX_FILES: usize = 10;

const NAME_SIZE: usize = 8;

/// One used file slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExeFsFile {
    pub name: String,
    /// Offset relative to the end of the header.
    pub offset: u32,
    pub size: u32,
    pub hash: [u8; SHA256_SIZE],
    /// Hash check result; [`ValidState::Unchecked`] unless verification
    /// was requested.
    pub valid: ValidState,
}

/// A parsed ExeFS with a flat [`Snapshot`] of its files.
#[derive(Debug)]
pub struct ExeFs {
    /// Used slots in header order.
    pub files: Vec<ExeFsFile>,
    pub snapshot: Snapshot,
}

/// Read the ten slots; unused ones are `None`.
fn parse_header<R: Read>(r: &mut R) -> Result<Vec<Option<ExeFsFile>>> {
    let mut slots = Vec::with_capacity(MAX_FILES);
    for _ in 0..MAX_FILES {
        let name = bytesa::<NAME_SIZE>(r)?;
        let offset = le_u32(r)?;
        let size = le_u32(r)?;
        slots.push((name, offset, size));
    }
    let _reserved = bytesa::<0x20>(r)?;
    let mut hashes = Vec::with_capacity(MAX_FILES);
    for _ in 0..MAX_FILES {
        hashes.push(bytesa::<SHA256_SIZE>(r)?);
    }

    let mut files = Vec::with_capacity(MAX_FILES);
    for (i, (name, offset, size)) in slots.into_iter().enumerate() {
        if name == [0; NAME_SIZE] {
            if offset != 0 || size != 0 {
                return Err(Error::Corrupt("unused ExeFS slot has a data range"));
            }
            files.push(None);
            continue;
        }
        files.push(Some(ExeFsFile {
            name: padded_ascii(&name)?,
            offset,
            size,
            hash: hashes[MAX_FILES - 1 - i],
            valid: ValidState::Unchecked,
        }));
    }
    Ok(files)
}

/// SHA-256 over `len` bytes of `stream` starting at `offset`, read in blocks.
fn hash_range(stream: &StreamHandle, offset: u64, len: u64) -> Result<[u8; SHA256_SIZE]> {
    let mut stream = stream.borrow_mut();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BLOCK_SIZE];
    let mut done = 0;
    while done < len {
        let n = (len - done).min(COPY_BLOCK_SIZE as u64) as usize;
        read_exact_at(&mut *stream, offset + done, &mut buf[..n])?;
        hasher.update(&buf[..n]);
        done += n as u64;
    }
    Ok(hasher.finalize().into())
}

impl ExeFs {
    /// Parse the ExeFS at the start of `base`.
    ///
    /// With `verify`, every file is hashed and its [`ExeFsFile::valid`] set
    /// to [`ValidState::Good`] or [`ValidState::Fail`]. A failed hash is
    /// reported, not raised.
    pub fn parse(base: StreamHandle, verify: bool) -> Result<Self> {
        let image_len = base.borrow().length();
        let raw = read_vec_at(&mut *base.borrow_mut(), 0, HEADER_SIZE as usize)?;
        let slots = parse_header(&mut Cursor::new(raw))?;

        let mut snapshot = Snapshot::with_root();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        for mut file in slots.into_iter().flatten() {
            if file.offset as u64 % HEADER_SIZE != 0 {
                return Err(Error::Corrupt("ExeFS file offset is not 0x200-aligned"));
            }
            let start = HEADER_SIZE + file.offset as u64;
            if start + file.size as u64 > image_len {
                return Err(Error::Corrupt("ExeFS file data is outside the image"));
            }
            if !seen.insert(file.name.clone()) {
                return Err(Error::Corrupt("duplicate ExeFS file name"));
            }

            let stream = if file.size == 0 {
                shared(MemoryStream::read_only(Vec::new()))
            } else {
                shared(SubStream::new(base.clone(), start, file.size as u64)?)
            };
            snapshot.add_file(&Path::root(), &file.name, stream)?;

            if verify {
                let digest = hash_range(&base, start, file.size as u64)?;
                file.valid = ValidState::from_match(digest == file.hash);
                if file.valid == ValidState::Fail {
                    warn!("exefs: {} failed hash verification", file.name);
                }
            }
            debug!(
                "exefs: {} at {:#x}, {:#x} bytes, {:?}",
                file.name, start, file.size, file.valid
            );
            files.push(file);
        }

        Ok(Self { files, snapshot })
    }

    /// Find a file by name.
    pub fn get_file_by_name(&self, name: &str) -> Option<&ExeFsFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Hand the snapshot over to a [`crate::vfs::VirtualFileSystem`].
    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}
