//! Hello packet construction and validation.
//!
//! Obfuscated connections open with a 64-byte random nonce. Bytes 8..56 seed
//! the directional keystreams, bytes 56..60 carry the protocol tag, and bytes
//! 56..64 are sent already encrypted so the relay can check the tag after
//! deriving the same keys. Plain connections send only the 4-byte tag.

use rand::RngCore;

use crate::core::{
    FORBIDDEN_FIRST_BYTE, FORBIDDEN_FIRST_WORDS, HELLO_NONCE_SIZE, HELLO_TAG_OFFSET, PROTOCOL_TAG,
};
use crate::crypto::{CipherKeyPair, Role};

use super::endpoint::StreamMode;
use super::error::ProtocolError;

/// Bytes to write first on a fresh connection, plus the keystreams they seed.
#[derive(Debug)]
pub struct Hello {
    /// Wire bytes of the hello packet.
    pub wire: Vec<u8>,
    /// Client keystreams; `None` for plain connections.
    pub keys: Option<CipherKeyPair>,
}

impl Hello {
    /// Build the hello packet for `mode`.
    pub fn generate<R: RngCore>(mode: StreamMode, secret: &[u8], rng: &mut R) -> Self {
        match mode {
            StreamMode::Plain => Self {
                wire: PROTOCOL_TAG.to_vec(),
                keys: None,
            },
            StreamMode::Obfuscated => {
                let nonce = generate_nonce(rng);
                Self::from_nonce(nonce, secret)
            }
        }
    }

    /// Build an obfuscated hello packet from an already valid nonce.
    pub fn from_nonce(mut nonce: [u8; HELLO_NONCE_SIZE], secret: &[u8]) -> Self {
        nonce[HELLO_TAG_OFFSET..HELLO_TAG_OFFSET + PROTOCOL_TAG.len()].copy_from_slice(&PROTOCOL_TAG);

        let mut keys = CipherKeyPair::derive(&nonce, secret, Role::Client);
        let mut encrypted = nonce;
        keys.encrypt(&mut encrypted);

        let mut wire = nonce.to_vec();
        wire[HELLO_TAG_OFFSET..].copy_from_slice(&encrypted[HELLO_TAG_OFFSET..]);

        Self {
            wire,
            keys: Some(keys),
        }
    }
}

/// Draw random nonces until one passes [`is_valid_nonce`].
pub fn generate_nonce<R: RngCore>(rng: &mut R) -> [u8; HELLO_NONCE_SIZE] {
    let mut nonce = [0u8; HELLO_NONCE_SIZE];
    loop {
        rng.fill_bytes(&mut nonce);
        if is_valid_nonce(&nonce) {
            return nonce;
        }
    }
}

/// Check that a nonce cannot be mistaken for another protocol by the relay.
pub fn is_valid_nonce(nonce: &[u8; HELLO_NONCE_SIZE]) -> bool {
    if nonce[0] == FORBIDDEN_FIRST_BYTE {
        return false;
    }

    let first = [nonce[0], nonce[1], nonce[2], nonce[3]];
    if FORBIDDEN_FIRST_WORDS.contains(&first) {
        return false;
    }

    nonce[4..8] != [0, 0, 0, 0]
}

/// Relay side: validate a received hello packet and derive relay keystreams.
///
/// The returned keys have already consumed the 64 hello bytes, matching the
/// client's send position.
pub fn accept_hello(
    wire: &[u8; HELLO_NONCE_SIZE],
    secret: &[u8],
) -> Result<CipherKeyPair, ProtocolError> {
    let mut keys = CipherKeyPair::derive(wire, secret, Role::Relay);

    let mut decrypted = *wire;
    keys.decrypt(&mut decrypted);

    if decrypted[HELLO_TAG_OFFSET..HELLO_TAG_OFFSET + PROTOCOL_TAG.len()] != PROTOCOL_TAG {
        return Err(ProtocolError::BadHelloTag);
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_plain_hello_is_tag_only() {
        let hello = Hello::generate(StreamMode::Plain, &[], &mut OsRng);
        assert_eq!(hello.wire, PROTOCOL_TAG);
        assert!(hello.keys.is_none());
    }

    #[test]
    fn test_obfuscated_hello_layout() {
        let hello = Hello::generate(StreamMode::Obfuscated, b"secret", &mut OsRng);
        assert_eq!(hello.wire.len(), HELLO_NONCE_SIZE);

        let keys = hello.keys.as_ref().unwrap();
        assert_eq!(keys.processed(), (HELLO_NONCE_SIZE as u64, 0));

        let nonce: [u8; HELLO_NONCE_SIZE] = hello.wire.clone().try_into().unwrap();
        assert!(is_valid_nonce(&nonce));
    }

    #[test]
    fn test_relay_accepts_hello() {
        let hello = Hello::generate(StreamMode::Obfuscated, b"secret", &mut OsRng);
        let mut client = hello.keys.unwrap();
        let wire: [u8; HELLO_NONCE_SIZE] = hello.wire.try_into().unwrap();

        let mut relay = accept_hello(&wire, b"secret").unwrap();

        let mut buf = b"first frame".to_vec();
        client.encrypt(&mut buf);
        relay.decrypt(&mut buf);
        assert_eq!(buf, b"first frame");
    }

    #[test]
    fn test_relay_rejects_wrong_secret() {
        let hello = Hello::generate(StreamMode::Obfuscated, b"secret", &mut OsRng);
        let wire: [u8; HELLO_NONCE_SIZE] = hello.wire.try_into().unwrap();

        let err = accept_hello(&wire, b"other").unwrap_err();
        assert_eq!(err, ProtocolError::BadHelloTag);
    }

    #[test]
    fn test_tag_bytes_are_not_sent_in_clear() {
        let nonce = [0x11u8; HELLO_NONCE_SIZE];
        let hello = Hello::from_nonce(nonce, &[]);

        assert_eq!(&hello.wire[..HELLO_TAG_OFFSET], &nonce[..HELLO_TAG_OFFSET]);
        assert_ne!(&hello.wire[HELLO_TAG_OFFSET..HELLO_TAG_OFFSET + 4], &PROTOCOL_TAG);
    }

    #[test]
    fn test_nonce_validation() {
        let mut nonce = [0x11u8; HELLO_NONCE_SIZE];
        assert!(is_valid_nonce(&nonce));

        nonce[0] = 0xef;
        assert!(!is_valid_nonce(&nonce));

        nonce[..4].copy_from_slice(b"POST");
        assert!(!is_valid_nonce(&nonce));

        nonce[..4].copy_from_slice(&[0x16, 0x03, 0x01, 0x02]);
        assert!(!is_valid_nonce(&nonce));

        nonce[..4].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        nonce[4..8].copy_from_slice(&[0, 0, 0, 0]);
        assert!(!is_valid_nonce(&nonce));
    }

    #[test]
    fn test_generated_nonces_differ() {
        let a = generate_nonce(&mut OsRng);
        let b = generate_nonce(&mut OsRng);
        assert_ne!(a, b);
    }
}
