//! Low-level parsing primitives shared by the format modules.
//!
//! The readers fetch exactly the bytes they promise or return an error;
//! there is no partial-read ambiguity. They work on any [`Read`], which in
//! practice is a [`std::io::Cursor`] over a table already loaded from a
//! [`crate::io::Stream`].

use std::io::{self, Read};

use crate::{Error, Result};

fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
        _ => Error::Io(e),
    })
}

/// Read a little-endian `u32`.
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(bytesa(r)?))
}

/// Read a little-endian `u64`.
#[inline]
pub(crate) fn le_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(bytesa(r)?))
}

/// Read exactly `N` bytes into a fixed-size array.
#[inline]
pub(crate) fn bytesa<const N: usize>(r: &mut impl Read) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    fill(r, &mut b)?;
    Ok(b)
}

/// Verify that the next `N` bytes match `expected`.
///
/// Returns [`Error::BadMagic`] on mismatch.
#[inline]
pub(crate) fn magic<R: Read, const N: usize>(r: &mut R, expected: &[u8; N]) -> Result<()> {
    if &bytesa::<N>(r)? != expected {
        return Err(Error::BadMagic);
    }
    Ok(())
}

/// Round `value` up to a multiple of `align` (a power of two).
///
/// Offsets come from untrusted headers, so overflow is corruption.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> Result<u64> {
    debug_assert!(align.is_power_of_two());
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
        .ok_or(Error::Corrupt("offset arithmetic overflows"))
}

/// Decode a UTF-16LE name of `len` bytes.
///
/// Odd lengths and unpaired surrogates are corruption.
pub(crate) fn utf16le_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Corrupt("UTF-16 name has an odd byte length"));
    }
    let units = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|_| Error::Corrupt("name is not valid UTF-16"))
}

/// Extract a NUL-padded ASCII name from a fixed-size field.
pub(crate) fn padded_ascii(field: &[u8]) -> Result<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let name = &field[..end];
    if !name.is_ascii() {
        return Err(Error::Corrupt("name is not ASCII"));
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}
