//! Framed TCP transport to a relay.
//!
//! This module provides:
//!
//! - **Endpoints**: [`Endpoint`], [`EndpointFlags`] and the per-DC [`DcOptions`] table
//! - **Framing**: [`encode_frame`] and the incremental [`FrameDecoder`]
//! - **Hello packet**: [`Hello`] nonce generation and key seeding
//! - **Connection**: the [`Transport`] handle and its [`ConnectionState`] machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Session Layer                  │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frames, hello packet, guard timer     │
//! ├─────────────────────────────────────────┤
//! │   Stream Obfuscation (AES-256-CTR)      │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod connection;
mod endpoint;
mod error;
mod frame;
mod handshake;

pub use config::{TransportConfig, TransportConfigBuilder};
pub use connection::{ConnectionState, EventReceiver, Transport, TransportEvent};
pub use endpoint::{DcOptions, Endpoint, EndpointFlags, StreamMode};
pub use error::*;
pub use frame::{encode_frame, FrameDecoder, FrameError, FrameHeader};
pub use handshake::{accept_hello, generate_nonce, is_valid_nonce, Hello};
