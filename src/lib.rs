//! # relaywire
//!
//! Client side of an obfuscated, length-prefixed binary protocol over raw TCP,
//! plus out-of-band discovery of relay endpoints when direct connectivity is
//! blocked.
//!
//! - **Framing**: compact and extended length headers, optional frame digest
//! - **Obfuscation**: 64-byte hello nonce seeding AES-256-CTR keystreams
//! - **Connection**: one driver task per connection, ordered event stream
//! - **Discovery**: racing HTTPS lookups of a digest-checked bootstrap blob
//!
//! ## Feature Flags
//!
//! - `crypto` (default): AES-256-CTR keystreams and key derivation
//! - `transport` (default): framed TCP transport (tokio)
//! - `discovery` (default): endpoint discovery (reqwest)
//!
//! ## Modules
//!
//! - [`core`]: Constants, configuration errors, `DcId` (always included)
//! - [`crypto`]: Stream obfuscation (requires `crypto` feature)
//! - [`transport`]: Frames, hello packet, connection (requires `transport` feature)
//! - [`discovery`]: Endpoint discovery (requires `discovery` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use relaywire::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfigBuilder::new()
//!     .secret(b"pre-shared".to_vec())
//!     .expected_ack_seq(1)
//!     .build()?;
//!
//! let (mut transport, mut events) = Transport::new(config);
//! transport.connect(Endpoint::obfuscated("203.0.113.10", 443))?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TransportEvent::StateChanged(ConnectionState::Ready) => {
//!             transport.send(b"hello relay".to_vec())?;
//!         }
//!         TransportEvent::FrameReceived(frame) => println!("{} bytes", frame.len()),
//!         TransportEvent::Error(error) => return Err(error.into()),
//!         TransportEvent::StateChanged(_) => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Discovery (feature-gated)
#[cfg(feature = "discovery")]
#[cfg_attr(docsrs, doc(cfg(feature = "discovery")))]
pub mod discovery;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use crate::core::{ConfigError, DcId};

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ConnectionState, DcOptions, Endpoint, EndpointFlags, EventReceiver, SendError, Transport,
        TransportConfig, TransportConfigBuilder, TransportError, TransportEvent, TransportResult,
    };

    // Discovery types (when enabled)
    #[cfg(feature = "discovery")]
    pub use crate::discovery::{DiscoveryConfig, EndpointDiscovery, SimpleConfig};
}

// Re-export commonly used items at crate root
pub use crate::core::{ConfigError, DcId};

#[cfg(feature = "transport")]
pub use crate::transport::{
    ConnectionState, DcOptions, Endpoint, EndpointFlags, Transport, TransportConfig,
    TransportError, TransportEvent,
};

#[cfg(feature = "discovery")]
pub use crate::discovery::{DiscoveryConfig, EndpointDiscovery};
