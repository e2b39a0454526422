//! Library-wide error and result types.

use std::io;

use crate::vfs::Path;

/// Result alias used throughout ctrkit.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Verification mismatches are not errors; they are reported as
/// [`crate::crypto::ValidState`] values next to a successful result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object was never initialized or has been disposed.
    #[error("object is disposed or was never initialized")]
    Disposed,
    /// The object lacks the capability the operation needs.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// The operation is never available on this type.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// A seek or window computation fell outside the valid range.
    #[error("offset or length out of range")]
    OutOfRange,
    /// A magic/signature field did not match the expected value.
    #[error("bad magic value")]
    BadMagic,
    /// A structural invariant of an offset-linked table was violated.
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    /// The stream ended before all expected bytes could be read.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// The path is not present in the file index.
    #[error("file not found: {0}")]
    FileNotFound(Path),
    /// The path is not present in the directory index.
    #[error("directory not found: {0}")]
    DirectoryNotFound(Path),
    /// An underlying host I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::UnexpectedEof => io::Error::from(io::ErrorKind::UnexpectedEof),
            Error::FileNotFound(_) | Error::DirectoryNotFound(_) => {
                io::Error::new(io::ErrorKind::NotFound, e)
            }
            Error::Unsupported(_) | Error::NotImplemented(_) => {
                io::Error::new(io::ErrorKind::Unsupported, e)
            }
            Error::OutOfRange => io::Error::new(io::ErrorKind::InvalidInput, e),
            other => io::Error::other(other),
        }
    }
}
