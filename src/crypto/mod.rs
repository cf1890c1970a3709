//! Stream obfuscation layer
//!
//! Implements the per-connection keystreams used to obfuscate the framed
//! byte stream:
//! - AES-256-CTR keystream state ([`CtrState`])
//! - Directional key derivation from the hello nonce ([`CipherKeyPair`])
//!
//! Key material for the pre-shared secret is supplied by the caller; no key
//! exchange happens here.

mod keys;
mod stream;

pub use keys::{CipherKeyPair, Role};
pub use stream::CtrState;
