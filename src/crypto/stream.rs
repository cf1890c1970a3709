//! AES-256-CTR keystream state
//!
//! One `CtrState` exists per direction. The keystream position advances with
//! every byte processed, so the state must see the stream in order and
//! exactly once.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::core::{CIPHER_IV_SIZE, CIPHER_KEY_SIZE};

type Aes256Ctr = Ctr128BE<Aes256>;

/// Keystream generator/consumer for one direction of a connection.
pub struct CtrState {
    cipher: Aes256Ctr,
    processed: u64,
}

impl CtrState {
    /// Create a keystream from a 32-byte key and a 16-byte initial counter block.
    pub fn new(key: &[u8; CIPHER_KEY_SIZE], iv: &[u8; CIPHER_IV_SIZE]) -> Self {
        Self {
            cipher: Aes256Ctr::new(key.into(), iv.into()),
            processed: 0,
        }
    }

    /// XOR `buf` with the next `buf.len()` keystream bytes, in place.
    ///
    /// Encryption and decryption are the same operation.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
        self.processed = self.processed.wrapping_add(buf.len() as u64);
    }

    /// Number of keystream bytes consumed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl std::fmt::Debug for CtrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrState")
            .field("key", &"[REDACTED]")
            .field("processed", &self.processed)
            .finish()
    }
}
