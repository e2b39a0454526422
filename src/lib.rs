//! **ctrkit** - stream and virtual filesystem layer for Nintendo 3DS
//! binary formats.
//!
//! A 3DS image is a stack of regions: windows into a file, AES-CTR or
//! AES-CBC encrypted sections, IVFC hash trees, and finally filesystems
//! such as RomFS and ExeFS. ctrkit models each layer as a [`io::Stream`]
//! decorator and turns the innermost one into a path-addressed
//! [`vfs::VirtualFileSystem`].
//!
//! # Modules
//! | Module | Contents |
//! |--------|----------|
//! | [`io`]      | `Stream` trait, memory/file/sub/concatenated streams, AES-CTR, AES-CBC, IVFC |
//! | [`crypto`]  | AES-128 block cipher, SHA-256, `ValidState` |
//! | [`formats`] | RomFS and ExeFS snapshot generators |
//! | [`vfs`]     | `Path`, `Snapshot`, `FileSystem`, virtual and host filesystems |
//!
//! # Example
//! ```no_run
//! use ctrkit::formats::romfs;
//! use ctrkit::io::{FileStream, IvfcStream, Stream, shared};
//! use ctrkit::vfs::{FileAccess, FileMode, FileSystem, Path, VirtualFileSystem};
//!
//! # fn main() -> ctrkit::Result<()> {
//! let image = shared(FileStream::open("romfs.bin")?);
//! let level3 = shared(IvfcStream::new(image)?);
//! let mut fs = VirtualFileSystem::new(romfs::generate_snapshot(level3)?)?;
//! let file = fs.open_file(&Path::new("/data/title.bin"), FileMode::Open, FileAccess::Read)?;
//! println!("{} bytes", file.borrow().length());
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod formats;
pub mod io;
pub(crate) mod utils;
pub mod vfs;

pub use error::{Error, Result};
