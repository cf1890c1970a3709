//! Directional key derivation from the hello nonce
//!
//! Both peers derive the same two keystreams from the 64-byte hello nonce:
//!
//! ```text
//! nonce[8..40]  -> key (client send / relay receive)
//! nonce[40..56] -> iv
//! reverse(nonce[8..56]) -> key | iv (client receive / relay send)
//! ```
//!
//! With a non-empty pre-shared secret each key becomes `SHA-256(key || secret)`.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::core::{
    CIPHER_IV_SIZE, CIPHER_KEY_SIZE, HELLO_NONCE_SIZE, KEY_MATERIAL_OFFSET, KEY_MATERIAL_SIZE,
};

use super::CtrState;

/// Which end of the connection derives the keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Connecting side, author of the hello nonce.
    Client,
    /// Accepting side.
    Relay,
}

/// Send and receive keystreams for one connection.
///
/// Established once per connection attempt and never rotated.
#[derive(Debug)]
pub struct CipherKeyPair {
    send: CtrState,
    receive: CtrState,
}

impl CipherKeyPair {
    /// Derive both directional keystreams for `role`.
    pub fn derive(nonce: &[u8; HELLO_NONCE_SIZE], secret: &[u8], role: Role) -> Self {
        let mut forward = Zeroizing::new([0u8; KEY_MATERIAL_SIZE]);
        forward.copy_from_slice(&nonce[KEY_MATERIAL_OFFSET..KEY_MATERIAL_OFFSET + KEY_MATERIAL_SIZE]);

        let mut reversed = forward.clone();
        reversed.reverse();

        let forward = keystream(&forward, secret);
        let reversed = keystream(&reversed, secret);

        match role {
            Role::Client => Self {
                send: forward,
                receive: reversed,
            },
            Role::Relay => Self {
                send: reversed,
                receive: forward,
            },
        }
    }

    /// Encrypt outgoing bytes in place.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.send.apply(buf);
    }

    /// Decrypt incoming bytes in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.receive.apply(buf);
    }

    /// Keystream bytes consumed as `(sent, received)`.
    pub fn processed(&self) -> (u64, u64) {
        (self.send.processed(), self.receive.processed())
    }
}

fn keystream(material: &[u8; KEY_MATERIAL_SIZE], secret: &[u8]) -> CtrState {
    let mut key = Zeroizing::new([0u8; CIPHER_KEY_SIZE]);
    key.copy_from_slice(&material[..CIPHER_KEY_SIZE]);

    if !secret.is_empty() {
        let digest = Sha256::new()
            .chain_update(key.as_slice())
            .chain_update(secret)
            .finalize();
        key.copy_from_slice(&digest);
    }

    let mut iv = [0u8; CIPHER_IV_SIZE];
    iv.copy_from_slice(&material[CIPHER_KEY_SIZE..]);

    CtrState::new(&key, &iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_nonce() -> [u8; HELLO_NONCE_SIZE] {
        let mut nonce = [0u8; HELLO_NONCE_SIZE];
        for (i, byte) in nonce.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        nonce
    }

    #[test]
    fn test_client_to_relay_symmetry() {
        let nonce = test_nonce();
        let mut client = CipherKeyPair::derive(&nonce, b"secret", Role::Client);
        let mut relay = CipherKeyPair::derive(&nonce, b"secret", Role::Relay);

        let original = b"hello relay".to_vec();
        let mut buf = original.clone();
        client.encrypt(&mut buf);
        relay.decrypt(&mut buf);
        assert_eq!(buf, original);

        let original = b"hello client".to_vec();
        let mut buf = original.clone();
        relay.encrypt(&mut buf);
        client.decrypt(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_directions_use_distinct_keystreams() {
        let nonce = test_nonce();
        let mut client = CipherKeyPair::derive(&nonce, &[], Role::Client);

        let mut sent = [0u8; 32];
        let mut received = [0u8; 32];
        client.encrypt(&mut sent);
        client.decrypt(&mut received);

        assert_ne!(sent, received);
    }

    #[test]
    fn test_secret_changes_keystream() {
        let nonce = test_nonce();
        let mut plain = CipherKeyPair::derive(&nonce, &[], Role::Client);
        let mut keyed = CipherKeyPair::derive(&nonce, b"proxy-secret", Role::Client);

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        plain.encrypt(&mut a);
        keyed.encrypt(&mut b);

        assert_ne!(a, b);
    }

    #[test]
    fn test_mismatched_secret_fails_to_decrypt() {
        let nonce = test_nonce();
        let mut client = CipherKeyPair::derive(&nonce, b"one", Role::Client);
        let mut relay = CipherKeyPair::derive(&nonce, b"two", Role::Relay);

        let original = b"payload".to_vec();
        let mut buf = original.clone();
        client.encrypt(&mut buf);
        relay.decrypt(&mut buf);
        assert_ne!(buf, original);
    }

    #[test]
    fn test_processed_counters() {
        let nonce = test_nonce();
        let mut client = CipherKeyPair::derive(&nonce, &[], Role::Client);

        client.encrypt(&mut [0u8; 64]);
        client.decrypt(&mut [0u8; 9]);

        assert_eq!(client.processed(), (64, 9));
    }
}
