//! Simple config: the bootstrap blob returned by discovery lookups.
//!
//! ```text
//! blob      = nonce[16] || ciphertext
//! plaintext = ciphertext ^ keystream(nonce)
//!           = body || SHA-256(body)
//! body      = magic u32 | date u32 | expires u32 | count u32 | entry * count
//! entry     = dc_id i32 | ipv4 u32 | port u32
//! ```
//!
//! Integers are little-endian except the IPv4 address, which is stored as
//! network-order octets. Keystream block `i` is
//! `SHA-256(label || nonce || i as u32 LE)`. The blob may arrive as raw bytes
//! or as base64 text.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::{
    DcId, SIMPLE_CONFIG_DIGEST_SIZE, SIMPLE_CONFIG_KEYSTREAM_LABEL, SIMPLE_CONFIG_MAGIC,
    SIMPLE_CONFIG_MAX_ENTRIES, SIMPLE_CONFIG_NONCE_SIZE,
};

const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 12;
const MIN_BLOB_SIZE: usize = SIMPLE_CONFIG_NONCE_SIZE + HEADER_SIZE + SIMPLE_CONFIG_DIGEST_SIZE;

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Reasons a simple config blob is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimpleConfigError {
    /// Text payload is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Blob shorter than the fixed fields.
    #[error("blob of {0} bytes is too short")]
    TooShort(usize),

    /// Trailing digest does not match the body.
    #[error("digest mismatch")]
    DigestMismatch,

    /// Body does not start with the expected magic.
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    /// Entry count exceeds the supported maximum.
    #[error("{0} entries exceeds limit")]
    TooManyEntries(usize),

    /// Body length disagrees with the entry count.
    #[error("{count} entries do not fit a body of {len} bytes")]
    LengthMismatch {
        /// Declared entry count.
        count: usize,
        /// Body length in bytes.
        len: usize,
    },

    /// Entry port outside 1..=65535.
    #[error("invalid port {0}")]
    InvalidPort(u32),

    /// Config validity window has passed.
    #[error("config expired at {expires}, now {now}")]
    Expired {
        /// Expiry, unix seconds.
        expires: u32,
        /// Time of the check, unix seconds.
        now: u32,
    },
}

/// One relay endpoint announced by a simple config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleConfigEntry {
    /// Datacenter the endpoint belongs to.
    pub dc_id: DcId,
    /// Relay address.
    pub ip: Ipv4Addr,
    /// Relay port.
    pub port: u16,
}

/// Decoded simple config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleConfig {
    /// Issue time, unix seconds.
    pub date: u32,
    /// Expiry, unix seconds.
    pub expires: u32,
    /// Announced endpoints in preference order.
    pub entries: Vec<SimpleConfigEntry>,
}

impl SimpleConfig {
    /// Decode a lookup response: raw blob or base64 text.
    ///
    /// Surrounding whitespace, embedded line breaks and double quotes are
    /// ignored in text form. Expiry is not checked here.
    pub fn decode(response: &[u8]) -> Result<Self, SimpleConfigError> {
        if looks_like_base64(response) {
            let text: Vec<u8> = response
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace() && *b != b'"')
                .collect();
            let blob = BASE64.decode(text)?;
            Self::open(&blob)
        } else {
            Self::open(response)
        }
    }

    /// Deobfuscate and parse a raw blob.
    pub fn open(blob: &[u8]) -> Result<Self, SimpleConfigError> {
        if blob.len() < MIN_BLOB_SIZE {
            return Err(SimpleConfigError::TooShort(blob.len()));
        }

        let (nonce, ciphertext) = blob.split_at(SIMPLE_CONFIG_NONCE_SIZE);
        let mut plaintext = ciphertext.to_vec();
        apply_keystream(nonce, &mut plaintext);

        let (body, digest) = plaintext.split_at(plaintext.len() - SIMPLE_CONFIG_DIGEST_SIZE);
        if Sha256::digest(body).as_slice() != digest {
            return Err(SimpleConfigError::DigestMismatch);
        }

        Self::parse_body(body)
    }

    fn parse_body(body: &[u8]) -> Result<Self, SimpleConfigError> {
        let magic = read_u32(body, 0);
        if magic != SIMPLE_CONFIG_MAGIC {
            return Err(SimpleConfigError::BadMagic(magic));
        }

        let date = read_u32(body, 4);
        let expires = read_u32(body, 8);
        let count = read_u32(body, 12) as usize;
        if count > SIMPLE_CONFIG_MAX_ENTRIES {
            return Err(SimpleConfigError::TooManyEntries(count));
        }
        if body.len() != HEADER_SIZE + count * ENTRY_SIZE {
            return Err(SimpleConfigError::LengthMismatch {
                count,
                len: body.len(),
            });
        }

        let entries = body[HEADER_SIZE..]
            .chunks_exact(ENTRY_SIZE)
            .map(|entry| {
                let dc_id = read_u32(entry, 0) as i32;
                let ip = Ipv4Addr::new(entry[4], entry[5], entry[6], entry[7]);
                let port = read_u32(entry, 8);
                match u16::try_from(port) {
                    Ok(port) if port != 0 => Ok(SimpleConfigEntry { dc_id, ip, port }),
                    _ => Err(SimpleConfigError::InvalidPort(port)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            date,
            expires,
            entries,
        })
    }

    /// Encode and obfuscate under `nonce`.
    pub fn seal(&self, nonce: [u8; SIMPLE_CONFIG_NONCE_SIZE]) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_SIZE);
        body.extend_from_slice(&SIMPLE_CONFIG_MAGIC.to_le_bytes());
        body.extend_from_slice(&self.date.to_le_bytes());
        body.extend_from_slice(&self.expires.to_le_bytes());
        body.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            body.extend_from_slice(&entry.dc_id.to_le_bytes());
            body.extend_from_slice(&entry.ip.octets());
            body.extend_from_slice(&u32::from(entry.port).to_le_bytes());
        }

        let digest = Sha256::digest(&body);
        body.extend_from_slice(&digest);
        apply_keystream(&nonce, &mut body);

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&body);
        blob
    }

    /// Seal and base64-encode, as served by lookup endpoints.
    pub fn seal_base64(&self, nonce: [u8; SIMPLE_CONFIG_NONCE_SIZE]) -> String {
        BASE64.encode(self.seal(nonce))
    }

    /// Whether the config has expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u32) -> bool {
        now >= self.expires
    }

    /// Reject the config if it has expired at `now`.
    pub fn ensure_fresh(&self, now: u32) -> Result<(), SimpleConfigError> {
        if self.is_expired(now) {
            return Err(SimpleConfigError::Expired {
                expires: self.expires,
                now,
            });
        }
        Ok(())
    }
}

/// Current wall-clock time in unix seconds, saturating at `u32::MAX`.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
}

fn looks_like_base64(data: &[u8]) -> bool {
    data.iter().all(|b| {
        b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'"') || b.is_ascii_whitespace()
    })
}

fn apply_keystream(nonce: &[u8], data: &mut [u8]) {
    for (index, chunk) in data.chunks_mut(32).enumerate() {
        let block = Sha256::new()
            .chain_update(SIMPLE_CONFIG_KEYSTREAM_LABEL)
            .chain_update(nonce)
            .chain_update((index as u32).to_le_bytes())
            .finalize();
        for (byte, key) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key;
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
