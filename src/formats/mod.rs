//! Snapshot generators for 3DS container formats.
//!
//! Each generator reads a format's header and index tables from a base
//! [`crate::io::StreamHandle`], validates them, and produces a
//! [`crate::vfs::Snapshot`] whose file entries are windows into the same
//! base. Conventions shared by every module:
//!
//! * **Plaintext input** - decryption and hash-tree unwrapping are done by
//!   the stream decorators in [`crate::io`] before the base reaches a
//!   generator.
//! * **Metadata only** - file contents are never loaded; each entry is a
//!   [`crate::io::SubStream`] (or an empty [`crate::io::MemoryStream`]).
//! * **All or nothing** - a structural problem aborts the whole walk with
//!   [`crate::Error::Corrupt`]; no partial snapshot is returned.
//!
//! ## Format overview
//!
//! | Module    | Format | Description |
//! |-----------|--------|-------------|
//! | [`romfs`] | RomFS  | Directory tree with UTF-16 names; level 3 of an IVFC image |
//! | [`exefs`] | ExeFS  | Flat archive of up to ten files with SHA-256 digests |

pub mod exefs;
pub mod romfs;
