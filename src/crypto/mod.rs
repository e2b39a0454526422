//! Cryptographic primitives used by the stream layer.
//!
//! Key material is always supplied by the caller; deriving keys from a
//! console key bag is outside the scope of this crate.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`aes`] | AES-128 block transform and counter arithmetic |
//! | [`sha256`] | SHA-256 digest of a byte slice (via `sha2`) |
//! | [`ValidState`] | tri-state outcome of a hash or signature check |

pub mod aes;

use sha2::{Digest, Sha256};

/// Size of a SHA-256 digest in bytes.
pub const SHA256_SIZE: usize = 32;

/// Result of an integrity check.
///
/// Verification failures are expected, reportable outcomes, so they are
/// carried as data next to a successful parse rather than as an
/// [`crate::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidState {
    /// The check has not been performed.
    #[default]
    Unchecked,
    /// The data matched its recorded digest.
    Good,
    /// The data did not match its recorded digest.
    Fail,
}

impl ValidState {
    /// Build a state from the outcome of a comparison.
    pub fn from_match(matched: bool) -> Self {
        if matched { Self::Good } else { Self::Fail }
    }
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    Sha256::digest(data).into()
}
