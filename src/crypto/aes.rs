//! AES-128 block primitive.
//!
//! Only the raw block transform lives here. Chaining modes are implemented by
//! the stream decorators in [`crate::io::ctr`] and [`crate::io::cbc`], which
//! need random-access control over counters and chaining values that an
//! all-at-once mode helper cannot give them.
//!
//! The implementation is table-driven and not constant-time. It is intended
//! for offline file-format work, not for protecting secrets from a local
//! attacker.

/// Size of one AES block in bytes.
pub const BLOCK_SIZE: usize = 16;

/// One 16-byte AES state, stored column-major (`s[row + 4 * col]`).
pub type Block = [u8; BLOCK_SIZE];

const fn xtime(b: u8) -> u8 {
    (b << 1) ^ if b & 0x80 != 0 { 0x1B } else { 0 }
}

const fn build_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    // p walks the multiplicative group by powers of 3, q tracks its inverse.
    let mut p: u8 = 1;
    let mut q: u8 = 1;
    loop {
        p = p ^ (p << 1) ^ if p & 0x80 != 0 { 0x1B } else { 0 };
        q ^= q << 1;
        q ^= q << 2;
        q ^= q << 4;
        if q & 0x80 != 0 {
            q ^= 0x09;
        }
        let x = q ^ q.rotate_left(1) ^ q.rotate_left(2) ^ q.rotate_left(3) ^ q.rotate_left(4);
        sbox[p as usize] = x ^ 0x63;
        if p == 1 {
            break;
        }
    }
    sbox[0] = 0x63;
    sbox
}

const fn invert(table: &[u8; 256]) -> [u8; 256] {
    let mut inv = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inv[table[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

const SBOX: [u8; 256] = build_sbox();
const INV_SBOX: [u8; 256] = invert(&SBOX);

/// GF(2^8) multiply, reduction polynomial 0x11B.
fn gmul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        a = xtime(a);
        b >>= 1;
    }
    p
}

fn sub_bytes(s: &mut Block, table: &[u8; 256]) {
    for b in s.iter_mut() {
        *b = table[*b as usize];
    }
}

fn shift_rows(s: &mut Block) {
    let t = *s;
    for c in 0..4 {
        for r in 1..4 {
            s[r + 4 * c] = t[r + 4 * ((c + r) % 4)];
        }
    }
}

fn inv_shift_rows(s: &mut Block) {
    let t = *s;
    for c in 0..4 {
        for r in 1..4 {
            s[r + 4 * ((c + r) % 4)] = t[r + 4 * c];
        }
    }
}

fn mix_columns(s: &mut Block) {
    for col in s.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        let all = a0 ^ a1 ^ a2 ^ a3;
        col[0] ^= all ^ xtime(a0 ^ a1);
        col[1] ^= all ^ xtime(a1 ^ a2);
        col[2] ^= all ^ xtime(a2 ^ a3);
        col[3] ^= all ^ xtime(a3 ^ a0);
    }
}

fn inv_mix_columns(s: &mut Block) {
    for col in s.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        col[0] = gmul(a0, 0x0E) ^ gmul(a1, 0x0B) ^ gmul(a2, 0x0D) ^ gmul(a3, 0x09);
        col[1] = gmul(a0, 0x09) ^ gmul(a1, 0x0E) ^ gmul(a2, 0x0B) ^ gmul(a3, 0x0D);
        col[2] = gmul(a0, 0x0D) ^ gmul(a1, 0x09) ^ gmul(a2, 0x0E) ^ gmul(a3, 0x0B);
        col[3] = gmul(a0, 0x0B) ^ gmul(a1, 0x0D) ^ gmul(a2, 0x09) ^ gmul(a3, 0x0E);
    }
}

fn add_round_key(s: &mut Block, rk: &Block) {
    for (b, k) in s.iter_mut().zip(rk) {
        *b ^= k;
    }
}

/// An expanded AES-128 key.
#[derive(Clone)]
pub struct Aes128 {
    round_keys: [Block; 11],
}

impl Aes128 {
    /// Expand `key` into the eleven round keys.
    pub fn new(key: &[u8; 16]) -> Self {
        let mut w = [[0u8; 4]; 44];
        for (i, word) in key.chunks_exact(4).enumerate() {
            w[i].copy_from_slice(word);
        }
        let mut rcon = 1u8;
        for i in 4..44 {
            let mut t = w[i - 1];
            if i % 4 == 0 {
                t.rotate_left(1);
                for b in t.iter_mut() {
                    *b = SBOX[*b as usize];
                }
                t[0] ^= rcon;
                rcon = xtime(rcon);
            }
            for j in 0..4 {
                w[i][j] = w[i - 4][j] ^ t[j];
            }
        }

        let mut round_keys = [[0u8; BLOCK_SIZE]; 11];
        for (r, rk) in round_keys.iter_mut().enumerate() {
            for k in 0..4 {
                rk[4 * k..4 * k + 4].copy_from_slice(&w[4 * r + k]);
            }
        }
        Self { round_keys }
    }

    /// Encrypt one block in place.
    pub fn encrypt_block(&self, block: &mut Block) {
        add_round_key(block, &self.round_keys[0]);
        for rk in &self.round_keys[1..10] {
            sub_bytes(block, &SBOX);
            shift_rows(block);
            mix_columns(block);
            add_round_key(block, rk);
        }
        sub_bytes(block, &SBOX);
        shift_rows(block);
        add_round_key(block, &self.round_keys[10]);
    }

    /// Decrypt one block in place.
    pub fn decrypt_block(&self, block: &mut Block) {
        add_round_key(block, &self.round_keys[10]);
        for rk in self.round_keys[1..10].iter().rev() {
            inv_shift_rows(block);
            sub_bytes(block, &INV_SBOX);
            add_round_key(block, rk);
            inv_mix_columns(block);
        }
        inv_shift_rows(block);
        sub_bytes(block, &INV_SBOX);
        add_round_key(block, &self.round_keys[0]);
    }
}

impl std::fmt::Debug for Aes128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes128").finish_non_exhaustive()
    }
}

/// Add `blocks` to a 128-bit big-endian counter, wrapping on overflow.
pub fn counter_add(counter: &Block, blocks: u64) -> Block {
    u128::from_be_bytes(*counter)
        .wrapping_add(blocks as u128)
        .to_be_bytes()
}

/// XOR `src` into `dst` byte by byte (lengths must match).
pub fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}
