//! Protocol constants for the relay transport.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// HELLO PACKET
// =============================================================================

/// Size of the random hello nonce sent as the first bytes of a connection.
pub const HELLO_NONCE_SIZE: usize = 64;

/// Offset of the protocol tag inside the hello nonce.
pub const HELLO_TAG_OFFSET: usize = 56;

/// Protocol tag carried at `HELLO_TAG_OFFSET` and sent alone on plain endpoints.
pub const PROTOCOL_TAG: [u8; 4] = [0xef, 0xef, 0xef, 0xef];

/// First byte a hello nonce must never start with (plain-mode tag byte).
pub const FORBIDDEN_FIRST_BYTE: u8 = 0xef;

/// First words a hello nonce must never start with.
///
/// They would make the stream look like HTTP, TLS or another transport mode.
pub const FORBIDDEN_FIRST_WORDS: [[u8; 4]; 7] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    [0xdd, 0xdd, 0xdd, 0xdd],
    [0xee, 0xee, 0xee, 0xee],
    [0x16, 0x03, 0x01, 0x02],
];

// =============================================================================
// STREAM CIPHER
// =============================================================================

/// AES-256 key size.
pub const CIPHER_KEY_SIZE: usize = 32;

/// CTR initial counter block size.
pub const CIPHER_IV_SIZE: usize = 16;

/// Offset of the send key inside the hello nonce.
pub const KEY_MATERIAL_OFFSET: usize = 8;

/// Key + IV bytes taken from the hello nonce for one direction.
pub const KEY_MATERIAL_SIZE: usize = CIPHER_KEY_SIZE + CIPHER_IV_SIZE;

// =============================================================================
// FRAMES
// =============================================================================

/// Frame payloads are padded to this alignment.
pub const WORD_SIZE: usize = 4;

/// Largest word count expressible in a compact header.
pub const COMPACT_MAX_WORDS: usize = 0x7f;

/// Marker byte introducing an extended header.
pub const EXTENDED_MARKER: u8 = 0x80;

/// Compact header size.
pub const COMPACT_HEADER_SIZE: usize = 1;

/// Extended header size (marker + LE32 byte length).
pub const EXTENDED_HEADER_SIZE: usize = 5;

/// Trailing frame digest size.
pub const CHECKSUM_SIZE: usize = 4;

/// Largest payload the wire format can describe.
pub const MAX_PAYLOAD_SIZE: usize = 0x7fff_ffff;

/// Default payload limit enforced by the decoder and `send`.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// TIMING
// =============================================================================

/// Initial guard timeout for the connect + handshake phases.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound for the guard timeout after repeated timeouts.
pub const MAX_GUARD_TIMEOUT: Duration = Duration::from_secs(64);

/// Socket read chunk size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Received frames buffered ahead of the session layer.
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

/// Outgoing frames buffered ahead of the socket.
pub const DEFAULT_COMMAND_QUEUE_SIZE: usize = 32;

/// Largest value `expected_ack_seq` may take.
///
/// A 4-byte frame holding a negative LE32 is a relay error code, so larger
/// sequence values could never be told apart from one.
pub const MAX_ACK_SEQ: u32 = i32::MAX as u32;

// =============================================================================
// DISCOVERY
// =============================================================================

/// Placeholder app metadata lookup URL.
///
/// Deployments must override it with a host serving their own simple config.
pub const DEFAULT_APP_URL: &str = "https://bootstrap.example.net/relaywire/simple-config";

/// Placeholder DNS-TXT-over-HTTPS lookup URL.
///
/// Deployments must override it with a resolver query for their own TXT name.
pub const DEFAULT_DNS_URL: &str =
    "https://doh.example.net/resolve?name=_relaywire.example.net&type=16";

/// Per-request timeout for discovery lookups.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Leading nonce of a simple config blob.
pub const SIMPLE_CONFIG_NONCE_SIZE: usize = 16;

/// Trailing SHA-256 digest of a simple config body.
pub const SIMPLE_CONFIG_DIGEST_SIZE: usize = 32;

/// First field of every simple config body.
pub const SIMPLE_CONFIG_MAGIC: u32 = 0x5ec0_4f1e;

/// Domain separation label for the simple config keystream.
pub const SIMPLE_CONFIG_KEYSTREAM_LABEL: &[u8] = b"relaywire/simple-config/v1";

/// Upper bound on entries in one simple config.
pub const SIMPLE_CONFIG_MAX_ENTRIES: usize = 256;
