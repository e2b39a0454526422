//! RomFS (read-only filesystem) - the level 3 payload of an IVFC image.
//!
//! ## Header (0x28 bytes, all u32 LE)
//! ```text
//! [0x00] HeaderSize (0x28)
//! [0x04] DirHashTableOffset        [0x08] DirHashTableSize
//! [0x0C] DirMetaTableOffset        [0x10] DirMetaTableSize
//! [0x14] FileHashTableOffset       [0x18] FileHashTableSize
//! [0x1C] FileMetaTableOffset       [0x20] FileMetaTableSize
//! [0x24] FileDataOffset
//! ```
//! Tables follow the header back to back, each 4-aligned; file data starts at
//! the file meta table end aligned to 0x10.
//!
//! ## Directory entry (0x18 bytes + name)
//! ```text
//! [0x00] Parent VA      [0x04] Next sibling VA   [0x08] First child dir VA
//! [0x0C] First file VA  [0x10] Hash bucket next  [0x14] Name length (bytes)
//! [0x18] Name (UTF-16LE, padded to 4 bytes)
//! ```
//!
//! ## File entry (0x20 bytes + name)
//! ```text
//! [0x00] Parent dir VA  [0x04] Next sibling VA
//! [0x08] Data offset (u64, relative to FileDataOffset)
//! [0x10] Data size (u64)
//! [0x18] Hash bucket next  [0x1C] Name length (bytes)
//! [0x20] Name (UTF-16LE, padded to 4 bytes)
//! ```
//!
//! A VA (virtual address) is a byte offset into the owning meta table.
//! `0xFFFFFFFF` marks an empty link. The root directory sits at VA 0 with
//! parent 0 and an empty name.
//!
//! The hash tables only speed up lookups on hardware; the generator ignores
//! them and walks the meta tables linearly, which visits every parent before
//! its children.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use log::debug;

use crate::io::{MemoryStream, StreamHandle, SubStream, read_vec_at, shared};
use crate::utils::{align_up, le_u32, le_u64, utf16le_name};
use crate::vfs::{Path, Snapshot};
use crate::{Error, Result};

/// Empty link sentinel in the meta tables.
pub const EMPTY: u32 = 0xFFFF_FFFF;

const DIR_ENTRY_SIZE: usize = 0x18;
const FILE_ENTRY_SIZE: usize = 0x20;

/// Offset and size of one table, relative to the RomFS start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: u32,
    pub size: u32,
}

impl Region {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            offset: le_u32(r)?,
            size: le_u32(r)?,
        })
    }

    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// Parsed RomFS level 3 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomFsHeader {
    pub header_size: u32,
    pub dir_hash: Region,
    pub dir_meta: Region,
    pub file_hash: Region,
    pub file_meta: Region,
    pub data_offset: u32,
}

impl RomFsHeader {
    pub const SIZE: usize = 0x28;

    /// Read the header fields. Layout checks happen in [`Self::validate`].
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            header_size: le_u32(r)?,
            dir_hash: Region::read(r)?,
            dir_meta: Region::read(r)?,
            file_hash: Region::read(r)?,
            file_meta: Region::read(r)?,
            data_offset: le_u32(r)?,
        })
    }

    /// Check that the tables are laid out back to back and that the data
    /// section starts inside an image of `image_len` bytes.
    pub fn validate(&self, image_len: u64) -> Result<()> {
        if self.header_size as usize != Self::SIZE {
            return Err(Error::Corrupt("unexpected RomFS header size"));
        }
        let mut expected = align_up(Self::SIZE as u64, 4)?;
        for table in [self.dir_hash, self.dir_meta, self.file_hash, self.file_meta] {
            if table.offset as u64 != expected {
                return Err(Error::Corrupt("RomFS table is out of place"));
            }
            expected = align_up(table.end(), 4)?;
        }
        let data_offset = self.data_offset as u64;
        if data_offset != align_up(self.file_meta.end(), 0x10)? {
            return Err(Error::Corrupt("RomFS data offset does not follow the tables"));
        }
        if data_offset > image_len {
            return Err(Error::Corrupt("RomFS data offset is outside the image"));
        }
        Ok(())
    }
}

struct DirRecord {
    parent: u32,
    sibling: u32,
    name_len: u32,
    name: String,
    end: usize,
}

struct FileRecord {
    parent: u32,
    sibling: u32,
    offset: u64,
    size: u64,
    name: String,
    end: usize,
}

/// The padded name following a fixed-size record at `start`, and the offset
/// just past it.
fn name_at(table: &[u8], start: usize, len: u32) -> Result<(String, usize)> {
    let overrun = Error::Corrupt("RomFS entry overruns its table");
    let padded = align_up(len as u64, 4)?;
    let end = u64::try_from(start)
        .ok()
        .and_then(|s| s.checked_add(padded))
        .and_then(|e| usize::try_from(e).ok())
        .filter(|&e| e <= table.len())
        .ok_or(overrun)?;
    let name = utf16le_name(&table[start..start + len as usize])?;
    Ok((name, end))
}

fn fixed<const N: usize>(table: &[u8], va: usize) -> Result<Cursor<&[u8]>> {
    va.checked_add(N)
        .and_then(|end| table.get(va..end))
        .map(Cursor::new)
        .ok_or(Error::Corrupt("RomFS entry overruns its table"))
}

impl DirRecord {
    fn parse(table: &[u8], va: usize) -> Result<Self> {
        let mut r = fixed::<DIR_ENTRY_SIZE>(table, va)?;
        let parent = le_u32(&mut r)?;
        let sibling = le_u32(&mut r)?;
        let _first_child = le_u32(&mut r)?;
        let _first_file = le_u32(&mut r)?;
        let _hash_next = le_u32(&mut r)?;
        let name_len = le_u32(&mut r)?;
        let (name, end) = name_at(table, va + DIR_ENTRY_SIZE, name_len)?;
        Ok(Self {
            parent,
            sibling,
            name_len,
            name,
            end,
        })
    }
}

impl FileRecord {
    fn parse(table: &[u8], va: usize) -> Result<Self> {
        let mut r = fixed::<FILE_ENTRY_SIZE>(table, va)?;
        let parent = le_u32(&mut r)?;
        let sibling = le_u32(&mut r)?;
        let offset = le_u64(&mut r)?;
        let size = le_u64(&mut r)?;
        let _hash_next = le_u32(&mut r)?;
        let name_len = le_u32(&mut r)?;
        let (name, end) = name_at(table, va + FILE_ENTRY_SIZE, name_len)?;
        Ok(Self {
            parent,
            sibling,
            offset,
            size,
            name,
            end,
        })
    }
}

/// Siblings are laid out after the entry that links to them.
fn check_sibling(sibling: u32, va: usize) -> Result<()> {
    if sibling != EMPTY && (sibling as usize) < va {
        return Err(Error::Corrupt("RomFS sibling link points backwards"));
    }
    Ok(())
}

fn load_table(base: &StreamHandle, table: Region) -> Result<Vec<u8>> {
    read_vec_at(&mut *base.borrow_mut(), table.offset as u64, table.size as usize)
}

/// Build a [`Snapshot`] of the RomFS at the start of `base`.
///
/// Non-empty files become [`SubStream`]s over `base`; empty files get a
/// zero-length [`MemoryStream`]. Any structural problem aborts the whole
/// walk.
pub fn generate_snapshot(base: StreamHandle) -> Result<Snapshot> {
    let image_len = base.borrow().length();
    let raw = read_vec_at(&mut *base.borrow_mut(), 0, RomFsHeader::SIZE)?;
    let header = RomFsHeader::parse(&mut Cursor::new(raw))?;
    header.validate(image_len)?;
    debug!(
        "romfs: dir meta {:#x} bytes, file meta {:#x} bytes, data at {:#x}",
        header.dir_meta.size, header.file_meta.size, header.data_offset
    );

    let dir_table = load_table(&base, header.dir_meta)?;
    let file_table = load_table(&base, header.file_meta)?;

    let root = DirRecord::parse(&dir_table, 0)?;
    if root.parent != 0 || root.sibling != EMPTY || root.name_len != 0 {
        return Err(Error::Corrupt("RomFS root directory is malformed"));
    }

    let mut snapshot = Snapshot::with_root();
    let mut dirs: HashMap<u32, Path> = HashMap::from([(0, Path::root())]);

    let mut va = root.end;
    while va < dir_table.len() {
        let entry = DirRecord::parse(&dir_table, va)?;
        check_sibling(entry.sibling, va)?;
        let parent = dirs
            .get(&entry.parent)
            .ok_or(Error::Corrupt("RomFS directory parent is not indexed"))?;
        let path = snapshot.add_directory(parent, &entry.name)?;
        dirs.insert(va as u32, path);
        va = entry.end;
    }

    let data_offset = header.data_offset as u64;
    let mut va = 0;
    while va < file_table.len() {
        let entry = FileRecord::parse(&file_table, va)?;
        check_sibling(entry.sibling, va)?;
        let parent = dirs
            .get(&entry.parent)
            .ok_or(Error::Corrupt("RomFS file parent is not indexed"))?;

        let stream = if entry.size == 0 {
            shared(MemoryStream::read_only(Vec::new()))
        } else {
            let start = data_offset
                .checked_add(entry.offset)
                .filter(|s| s.checked_add(entry.size).is_some_and(|end| end <= image_len))
                .ok_or(Error::Corrupt("RomFS file data is outside the image"))?;
            shared(SubStream::new(base.clone(), start, entry.size)?)
        };
        snapshot.add_file(parent, &entry.name, stream)?;
        va = entry.end;
    }

    debug!(
        "romfs: {} directories, {} files",
        snapshot.dir_entries.len(),
        snapshot.file_entries.len()
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_exact_at;

    fn utf16(name: &str) -> Vec<u8> {
        name.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn patch_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// `dirs[0]` is the root; each entry is (parent index, name). Files are
    /// (parent dir index, name, content).
    fn build(dirs: &[(usize, &str)], files: &[(usize, &str, &str)]) -> Vec<u8> {
        let entry_len = |fixed: usize, name: &str| fixed + utf16(name).len().next_multiple_of(4);
        let mut dir_va = Vec::new();
        let mut va = 0;
        for (_, name) in dirs {
            dir_va.push(va as u32);
            va += entry_len(DIR_ENTRY_SIZE, name);
        }
        let mut file_va = Vec::new();
        let mut va = 0;
        for (_, name, _) in files {
            file_va.push(va as u32);
            va += entry_len(FILE_ENTRY_SIZE, name);
        }

        let mut data = Vec::new();
        let mut data_offsets = Vec::new();
        for (_, _, content) in files {
            data.resize(data.len().next_multiple_of(0x10), 0);
            data_offsets.push(data.len() as u64);
            data.extend_from_slice(content.as_bytes());
        }

        let mut dir_meta = Vec::new();
        for (i, (parent, name)) in dirs.iter().enumerate() {
            let sibling = (i + 1..dirs.len())
                .find(|&j| i != 0 && dirs[j].0 == *parent)
                .map_or(EMPTY, |j| dir_va[j]);
            let child = (1..dirs.len()).find(|&j| dirs[j].0 == i).map_or(EMPTY, |j| dir_va[j]);
            let file = files.iter().position(|f| f.0 == i).map_or(EMPTY, |j| file_va[j]);
            put_u32(&mut dir_meta, dir_va[*parent]);
            put_u32(&mut dir_meta, sibling);
            put_u32(&mut dir_meta, child);
            put_u32(&mut dir_meta, file);
            put_u32(&mut dir_meta, EMPTY);
            let name = utf16(name);
            put_u32(&mut dir_meta, name.len() as u32);
            dir_meta.extend_from_slice(&name);
            dir_meta.resize(dir_meta.len().next_multiple_of(4), 0);
        }

        let mut file_meta = Vec::new();
        for (i, (parent, name, content)) in files.iter().enumerate() {
            let sibling = (i + 1..files.len())
                .find(|&j| files[j].0 == *parent)
                .map_or(EMPTY, |j| file_va[j]);
            put_u32(&mut file_meta, dir_va[*parent]);
            put_u32(&mut file_meta, sibling);
            file_meta.extend_from_slice(&data_offsets[i].to_le_bytes());
            file_meta.extend_from_slice(&(content.len() as u64).to_le_bytes());
            put_u32(&mut file_meta, EMPTY);
            let name = utf16(name);
            put_u32(&mut file_meta, name.len() as u32);
            file_meta.extend_from_slice(&name);
            file_meta.resize(file_meta.len().next_multiple_of(4), 0);
        }

        let bucket = EMPTY.to_le_bytes().to_vec();
        let tables = [&bucket, &dir_meta, &bucket, &file_meta];
        let mut image = vec![0u8; RomFsHeader::SIZE];
        patch_u32(&mut image, 0, RomFsHeader::SIZE as u32);
        for (i, table) in tables.iter().enumerate() {
            image.resize(image.len().next_multiple_of(4), 0);
            let offset = image.len() as u32;
            patch_u32(&mut image, 4 + i * 8, offset);
            patch_u32(&mut image, 8 + i * 8, table.len() as u32);
            image.extend_from_slice(table);
        }
        image.resize(image.len().next_multiple_of(0x10), 0);
        let data_offset = image.len() as u32;
        patch_u32(&mut image, 0x24, data_offset);
        image.extend_from_slice(&data);
        image
    }

    fn sample() -> Vec<u8> {
        build(
            &[(0, ""), (0, "dirA"), (0, "dirB"), (2, "nested")],
            &[
                (0, "fileA", "0123456789"),
                (2, "fileD", "abcdefghijklm"),
                (3, "empty", ""),
                (0, "fileB", "hello romfs"),
            ],
        )
    }

    fn generate(image: Vec<u8>) -> Result<Snapshot> {
        generate_snapshot(shared(MemoryStream::read_only(image)))
    }

    fn dir_meta_offset(image: &[u8]) -> usize {
        u32::from_le_bytes(image[0x0C..0x10].try_into().unwrap()) as usize
    }

    fn file_meta_offset(image: &[u8]) -> usize {
        u32::from_le_bytes(image[0x1C..0x20].try_into().unwrap()) as usize
    }

    fn contents(s: &Snapshot, path: &str) -> Vec<u8> {
        let stream = s.file_entries[s.file_map[&Path::new(path)]].stream.clone().unwrap();
        let len = stream.borrow().length() as usize;
        let mut out = vec![0u8; len];
        read_exact_at(&mut *stream.borrow_mut(), 0, &mut out).unwrap();
        out
    }

    #[test]
    fn walks_directories_and_files() {
        let s = generate(sample()).unwrap();
        assert!(s.has_valid_root());
        assert_eq!(s.dir_entries.len(), 4);
        assert_eq!(s.file_entries.len(), 4);

        let root = &s.dir_entries[s.dir_map[&Path::root()]];
        assert_eq!(root.dir_names, ["dirA", "dirB"]);
        assert_eq!(root.file_names, ["fileA", "fileB"]);
        let dir_b = &s.dir_entries[s.dir_map[&Path::new("/dirB")]];
        assert_eq!(dir_b.dir_names, ["nested"]);
        assert_eq!(dir_b.file_names, ["fileD"]);

        assert_eq!(contents(&s, "/fileA"), b"0123456789");
        assert_eq!(contents(&s, "/dirB/fileD"), b"abcdefghijklm");
        assert_eq!(contents(&s, "/fileB"), b"hello romfs");
        assert!(contents(&s, "/dirB/nested/empty").is_empty());
    }

    #[test]
    fn mounts_through_ivfc() {
        use crate::io::IvfcStream;
        use crate::io::ivfc::build_image;
        use crate::vfs::{FileAccess, FileMode, FileSystem, VirtualFileSystem};

        let ivfc = IvfcStream::new(shared(MemoryStream::read_only(build_image(&sample(), 12)))).unwrap();
        let mut vfs = VirtualFileSystem::new(generate_snapshot(shared(ivfc)).unwrap()).unwrap();
        let f = vfs
            .open_file(&Path::new("/dirB/fileD"), FileMode::Open, FileAccess::Read)
            .unwrap();
        assert_eq!(read_vec_at(&mut *f.borrow_mut(), 0, 13).unwrap(), b"abcdefghijklm");
    }

    #[test]
    fn header_layout_is_checked() {
        let mut image = sample();
        patch_u32(&mut image, 0, 0x2C);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        let mut image = sample();
        let data = u32::from_le_bytes(image[0x24..0x28].try_into().unwrap());
        patch_u32(&mut image, 0x24, data + 0x10);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        let mut image = sample();
        let moved = dir_meta_offset(&image) as u32 + 4;
        patch_u32(&mut image, 0x0C, moved);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        assert!(matches!(generate(vec![0x28, 0, 0]), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn root_must_be_well_formed() {
        let mut image = sample();
        let root = dir_meta_offset(&image);
        patch_u32(&mut image, root, 0x18);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        let mut image = sample();
        patch_u32(&mut image, root + 4, 0x18);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));
    }

    #[test]
    fn rejects_bad_links() {
        // dirA sits right after the root at VA 0x18; dirB follows it.
        let image = sample();
        let dir_a = dir_meta_offset(&image) + 0x18;
        let dir_b_va = 0x18 + DIR_ENTRY_SIZE + utf16("dirA").len();

        let mut bad = image.clone();
        patch_u32(&mut bad, dir_a, 0x1000);
        assert!(matches!(generate(bad), Err(Error::Corrupt(_))));

        let mut bad = image.clone();
        patch_u32(&mut bad, dir_a, dir_b_va as u32);
        assert!(matches!(generate(bad), Err(Error::Corrupt(_))));

        let mut bad = image.clone();
        patch_u32(&mut bad, dir_meta_offset(&image) + dir_b_va + 4, 0x18);
        assert!(matches!(generate(bad), Err(Error::Corrupt(_))));

        let first_file = file_meta_offset(&image);
        let mut bad = image;
        patch_u32(&mut bad, first_file, 0x7777);
        assert!(matches!(generate(bad), Err(Error::Corrupt(_))));
    }

    #[test]
    fn file_data_must_fit() {
        let mut image = sample();
        let first_file = file_meta_offset(&image);
        image[first_file + 8..first_file + 16].copy_from_slice(&0x1_0000u64.to_le_bytes());
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));
    }

    #[test]
    fn names_are_validated() {
        let image = build(&[(0, ""), (0, "a/b")], &[]);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        let image = build(&[(0, ""), (0, "same")], &[(0, "same", "x")]);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));

        // An odd name length cannot be UTF-16.
        let mut image = build(&[(0, ""), (0, "ab")], &[]);
        let name_len = dir_meta_offset(&image) + 0x18 + 0x14;
        patch_u32(&mut image, name_len, 3);
        assert!(matches!(generate(image), Err(Error::Corrupt(_))));
    }
}
