//! Out-of-band relay endpoint discovery.
//!
//! When relays cannot be reached directly, a small digest-checked bootstrap
//! blob (the *simple config*) listing alternative endpoints is fetched from
//! two independent HTTPS sources:
//!
//! - **App lookup**: an application metadata URL serving the blob as base64
//! - **DNS lookup**: DNS-over-HTTPS TXT records carrying the same blob
//!
//! [`EndpointDiscovery`] races both and reports the first usable answer as
//! `(dc_id, ip, port)` triples, ready for [`DcOptions::add_discovered`].
//!
//! The default URLs point at `example.net` placeholders. Deployments must set
//! their own with [`DiscoveryConfig::with_app_url`] and
//! [`DiscoveryConfig::with_dns_url`].
//!
//! [`DcOptions::add_discovered`]: crate::transport::DcOptions::add_discovered

mod lookup;
mod request;
mod simple_config;

pub use lookup::{dns_txt_payload, HttpLookup, Lookup, LookupError, LookupKind};
pub use request::{DiscoveryConfig, DiscoveryError, EndpointCallback, EndpointDiscovery};
pub use simple_config::{unix_now, SimpleConfig, SimpleConfigEntry, SimpleConfigError};
