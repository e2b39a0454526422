//! AES-128-CBC stream decoration (read-only).
//!
//! CIA contents and some firmware sections use AES-128-CBC. A block's
//! plaintext depends on the previous *ciphertext* block, so a read at an
//! arbitrary offset first fetches the ciphertext block just before the
//! target (or uses the IV for block 0) as its chaining value, then decrypts
//! forward.

use super::{SeekOrigin, Stream, StreamHandle, read_exact_at, seek_offset};
use crate::crypto::aes::{Aes128, BLOCK_SIZE, Block, xor_in_place};
use crate::{Error, Result};

struct CbcState {
    base: StreamHandle,
    cipher: Aes128,
    iv: Block,
}

/// Transparent AES-128-CBC decryption over a ciphertext stream.
///
/// Only whole 16-byte ciphertext blocks are decrypted; a trailing partial
/// block reads as end of stream. The default value is disposed.
#[derive(Default)]
pub struct AesCbcStream {
    state: Option<CbcState>,
}

impl AesCbcStream {
    /// Decorate ciphertext `base` with `key` and initial chaining value `iv`.
    pub fn new(base: StreamHandle, key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            state: Some(CbcState {
                base,
                cipher: Aes128::new(key),
                iv: *iv,
            }),
        }
    }

    fn state(&self) -> Result<&CbcState> {
        self.state.as_ref().ok_or(Error::Disposed)
    }
}

impl Stream for AesCbcStream {
    fn can_read(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.base.borrow().can_read())
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.base.borrow().can_seek())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let state = self.state()?;
        let mut base = state.base.borrow_mut();
        if !base.can_read() {
            return Err(Error::Unsupported("base stream is not readable"));
        }

        let block_size = BLOCK_SIZE as u64;
        let offset = base.position();
        let length = base.length();
        let readable_end = length - length % block_size;
        if buf.is_empty() || offset >= readable_end {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(readable_end - offset) as usize;

        let first_block = offset / block_size;
        let skip = (offset % block_size) as usize;
        let block_count = (skip + n).div_ceil(BLOCK_SIZE);

        let mut chain = state.iv;
        if first_block > 0 {
            read_exact_at(&mut *base, (first_block - 1) * block_size, &mut chain)?;
        }
        let mut ciphertext = vec![0u8; block_count * BLOCK_SIZE];
        read_exact_at(&mut *base, first_block * block_size, &mut ciphertext)?;

        let mut done = 0;
        for (i, ct) in ciphertext.chunks_exact(BLOCK_SIZE).enumerate() {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(ct);
            state.cipher.decrypt_block(&mut block);
            xor_in_place(&mut block, &chain);
            chain.copy_from_slice(ct);

            let from = if i == 0 { skip } else { 0 };
            let take = (BLOCK_SIZE - from).min(n - done);
            buf[done..done + take].copy_from_slice(&block[from..from + take]);
            done += take;
        }

        base.seek(seek_offset(offset + n as u64)?, SeekOrigin::Begin)?;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        self.state()?;
        Err(Error::NotImplemented("AES-CBC streams are read-only"))
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.state()?.base.borrow_mut().seek(offset, origin)
    }

    fn length(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.base.borrow().length())
    }

    fn position(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.base.borrow().position())
    }

    fn set_length(&mut self, _length: u64) -> Result<()> {
        self.state()?;
        Err(Error::NotImplemented("AES-CBC streams are read-only"))
    }

    fn flush(&mut self) -> Result<()> {
        self.state()?;
        Ok(())
    }

    fn dispose(&mut self) {
        self.state = None;
    }
}
