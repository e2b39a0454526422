//! AES-128-CTR stream decoration.
//!
//! NCCH ExeFS/RomFS regions and CIA contents of newer titles are encrypted
//! with AES-128-CTR. The keystream for byte `o` of the region comes from
//! block `o / 16`, whose counter is the region's initial counter plus
//! `o / 16` (128-bit big-endian). Any offset can therefore be served
//! directly, which is what makes this decoration seek-transparent.

use super::{SeekOrigin, Stream, StreamHandle};
use crate::crypto::aes::{Aes128, BLOCK_SIZE, Block, counter_add, xor_in_place};
use crate::{Error, Result};

struct CtrState {
    base: StreamHandle,
    cipher: Aes128,
    counter: Block,
}

/// Transparent AES-128-CTR over a base stream.
///
/// Length, position and capabilities mirror the base. Reading decrypts,
/// writing encrypts; both are the same operation.
#[derive(Default)]
pub struct AesCtrStream {
    state: Option<CtrState>,
}

impl AesCtrStream {
    /// Decorate `base` with `key` and the counter of the base's byte 0.
    pub fn new(base: StreamHandle, key: &[u8; 16], counter: &[u8; 16]) -> Self {
        Self {
            state: Some(CtrState {
                base,
                cipher: Aes128::new(key),
                counter: *counter,
            }),
        }
    }

    fn state(&self) -> Result<&CtrState> {
        self.state.as_ref().ok_or(Error::Disposed)
    }
}

/// XOR `data` with the CTR keystream starting at byte `offset`.
pub fn apply_keystream(cipher: &Aes128, counter: &Block, offset: u64, data: &mut [u8]) {
    let mut block = offset / BLOCK_SIZE as u64;
    let mut skip = (offset % BLOCK_SIZE as u64) as usize;
    let mut done = 0;
    while done < data.len() {
        let mut keystream = counter_add(counter, block);
        cipher.encrypt_block(&mut keystream);
        let take = (BLOCK_SIZE - skip).min(data.len() - done);
        xor_in_place(&mut data[done..done + take], &keystream[skip..skip + take]);
        done += take;
        skip = 0;
        block += 1;
    }
}

impl Stream for AesCtrStream {
    fn can_read(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.base.borrow().can_read())
    }

    fn can_write(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.base.borrow().can_write())
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
        let offset = base.position();
        let n = base.read(buf)?;
        apply_keystream(&state.cipher, &state.counter, offset, &mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let state = self.state()?;
        let mut base = state.base.borrow_mut();
        if !base.can_write() {
            return Err(Error::Unsupported("base stream is not writable"));
        }
        let offset = base.position();
        let mut scratch = buf.to_vec();
        apply_keystream(&state.cipher, &state.counter, offset, &mut scratch);
        base.write(&scratch)
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

    fn set_length(&mut self, length: u64) -> Result<()> {
        self.state()?.base.borrow_mut().set_length(length)
    }

    fn flush(&mut self) -> Result<()> {
        self.state()?.base.borrow_mut().flush()
    }

    fn dispose(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryStream, read_exact_at, shared};

    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const COUNTER: &str = "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff";
    const PLAINTEXT: &str = concat!(
        "6bc1bee22e409f96e93d7e117393172a",
        "ae2d8a571e03ac9c9eb76fac45af8e51",
        "30c81c46a35ce411e5fbc1191a0a52ef",
        "f69f2445df4f9b17ad2b417be66c3710",
    );
    const CIPHERTEXT: &str = concat!(
        "874d6191b620e3261bef6864990db6ce",
        "9806f66b7970fdff8617187bb9fffdff",
        "5ae4df3edbd5d35e5b4f09020db03eab",
        "1e031dda2fbe03d1792170a0f3009cee",
    );

    fn arr(s: &str) -> [u8; 16] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    fn stream() -> AesCtrStream {
        let base = shared(MemoryStream::from_vec(hex::decode(CIPHERTEXT).unwrap()));
        AesCtrStream::new(base, &arr(KEY), &arr(COUNTER))
    }

    #[test]
    fn sp800_38a_f51_full_read() {
        let mut s = stream();
        let mut out = vec![0u8; 64];
        read_exact_at(&mut s, 0, &mut out).unwrap();
        assert_eq!(out, hex::decode(PLAINTEXT).unwrap());
    }

    #[test]
    fn unaligned_random_access() {
        let plain = hex::decode(PLAINTEXT).unwrap();
        let mut s = stream();
        for (offset, len) in [(0x17usize, 0x11usize), (1, 3), (15, 2), (31, 33), (63, 1), (40, 0)] {
            let mut out = vec![0u8; len];
            read_exact_at(&mut s, offset as u64, &mut out).unwrap();
            assert_eq!(out, &plain[offset..offset + len], "offset {offset:#x}");
        }
    }

    #[test]
    fn write_encrypts_and_reads_back() {
        let base = shared(MemoryStream::new());
        let mut s = AesCtrStream::new(base.clone(), &arr(KEY), &arr(COUNTER));
        assert!(s.can_read() && s.can_write());

        let plain = hex::decode(PLAINTEXT).unwrap();
        s.write(&plain[..5]).unwrap();
        s.write(&plain[5..]).unwrap();

        let cipher = base.borrow().length();
        assert_eq!(cipher, 64);
        let mut raw = vec![0u8; 64];
        read_exact_at(&mut *base.borrow_mut(), 0, &mut raw).unwrap();
        assert_eq!(raw, hex::decode(CIPHERTEXT).unwrap());

        let mut back = vec![0u8; 64];
        read_exact_at(&mut s, 0, &mut back).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn disposed_stream_fails() {
        let mut s = stream();
        s.dispose();
        assert_eq!(s.length(), 0);
        assert!(!s.can_read());
        assert!(matches!(s.read(&mut [0u8; 4]), Err(Error::Disposed)));
        assert!(matches!(AesCtrStream::default().seek(0, SeekOrigin::Begin), Err(Error::Disposed)));
    }
}
