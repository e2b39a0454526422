//! List a RomFS image and optionally extract it.
//!
//! ```text
//! RUST_LOG=debug cargo run --example romfs -- romfs.bin [out-dir]
//! ```
//!
//! Images starting with an IVFC header are unwrapped and verified first.

use std::env;

use ctrkit::formats::romfs;
use ctrkit::io::{
    COPY_BLOCK_SIZE, FileStream, IvfcStream, Stream, StreamHandle, copy_stream, read_vec_at, shared,
};
use ctrkit::vfs::{FileAccess, FileMode, FileSystem, LocalFileSystem, Path, VirtualFileSystem};
use ctrkit::{Error, Result};

fn walk(vfs: &mut VirtualFileSystem, dir: &Path, out: &mut Option<LocalFileSystem>) -> Result<()> {
    let listing = vfs.get_directory_listing(dir)?;
    for name in &listing.dir_names {
        let path = dir.join(name);
        println!("{path}/");
        if let Some(local) = out.as_mut() {
            local.create_directory(&path)?;
        }
        walk(vfs, &path, out)?;
    }
    for name in &listing.file_names {
        let path = dir.join(name);
        let src = vfs.open_file(&path, FileMode::Open, FileAccess::Read)?;
        println!("{path} ({} bytes)", src.borrow().length());
        if let Some(local) = out.as_mut() {
            let dst = local.open_file(&path, FileMode::Create, FileAccess::Write)?;
            copy_stream(&mut *src.borrow_mut(), &mut *dst.borrow_mut(), COPY_BLOCK_SIZE)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("usage: romfs <image> [out-dir]");
        return Err(Error::Unsupported("missing image path"));
    };
    let mut out = match args.next() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            Some(LocalFileSystem::new(dir)?)
        }
        None => None,
    };

    let mut base: StreamHandle = shared(FileStream::open(&input)?);
    if read_vec_at(&mut *base.borrow_mut(), 0, 4)? == b"IVFC" {
        let ivfc = IvfcStream::new(base)?;
        println!("ivfc levels: {:?}", ivfc.verify()?);
        base = shared(ivfc);
    }

    let mut vfs = VirtualFileSystem::new(romfs::generate_snapshot(base)?)?;
    walk(&mut vfs, &Path::root(), &mut out)
}
