//! Relay endpoints and the per-datacenter candidate table.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::core::DcId;

/// Capability flags attached to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EndpointFlags(u8);

impl EndpointFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Endpoint expects the hello nonce and an obfuscated stream.
    pub const OBFUSCATED: Self = Self(0x01);
    /// Frames carry a trailing 4-byte digest.
    pub const CHECKSUM: Self = Self(0x02);
    /// Endpoint only serves media traffic.
    pub const MEDIA_ONLY: Self = Self(0x04);
    /// Endpoint address is IPv6.
    pub const IPV6: Self = Self(0x08);
    /// Endpoint only accepts obfuscated TCP.
    pub const TCPO_ONLY: Self = Self(0x10);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check whether every flag in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any flag in `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Return these flags with `other` added.
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Return these flags with `other` removed.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Byte-stream treatment selected from an endpoint's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Protocol tag preamble, cleartext frames.
    Plain,
    /// Hello nonce preamble, AES-CTR obfuscated frames.
    Obfuscated,
}

impl StreamMode {
    /// Short transport name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            StreamMode::Plain => "TCP",
            StreamMode::Obfuscated => "TCP-O",
        }
    }
}

/// A relay address with its capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    flags: EndpointFlags,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16, flags: EndpointFlags) -> Self {
        Self {
            host: host.into(),
            port,
            flags,
        }
    }

    /// Create an obfuscated endpoint, flagging IPv6 literals.
    pub fn obfuscated(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let mut flags = EndpointFlags::OBFUSCATED;
        if matches!(host.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
            flags = flags.with(EndpointFlags::IPV6);
        }
        Self { host, port, flags }
    }

    /// Host name or numeric address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Capability flags.
    pub fn flags(&self) -> EndpointFlags {
        self.flags
    }

    /// Whether frames to this endpoint carry a digest.
    pub fn uses_checksum(&self) -> bool {
        self.flags.contains(EndpointFlags::CHECKSUM)
    }

    /// Stream treatment for this endpoint.
    pub fn stream_mode(&self) -> StreamMode {
        if self
            .flags
            .intersects(EndpointFlags::OBFUSCATED.with(EndpointFlags::TCPO_ONLY))
        {
            StreamMode::Obfuscated
        } else {
            StreamMode::Plain
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered candidate endpoints per datacenter.
///
/// Insertion order is preference order. Duplicate host/port pairs within a
/// datacenter are ignored.
#[derive(Debug, Clone, Default)]
pub struct DcOptions {
    entries: BTreeMap<DcId, Vec<Endpoint>>,
}

impl DcOptions {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint for `dc_id`.
    ///
    /// Returns `false` if the same host and port were already known.
    pub fn add(&mut self, dc_id: DcId, endpoint: Endpoint) -> bool {
        let list = self.entries.entry(dc_id).or_default();
        if list
            .iter()
            .any(|known| known.host == endpoint.host && known.port == endpoint.port)
        {
            return false;
        }
        list.push(endpoint);
        true
    }

    /// Append an endpoint reported by discovery.
    pub fn add_discovered(&mut self, dc_id: DcId, ip: &str, port: u16) -> bool {
        self.add(dc_id, Endpoint::obfuscated(ip, port))
    }

    /// All endpoints known for `dc_id`, in preference order.
    pub fn endpoints(&self, dc_id: DcId) -> &[Endpoint] {
        self.entries.get(&dc_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Endpoints for `dc_id` that carry none of the `exclude` flags.
    pub fn candidates(
        &self,
        dc_id: DcId,
        exclude: EndpointFlags,
    ) -> impl Iterator<Item = &Endpoint> + '_ {
        self.endpoints(dc_id)
            .iter()
            .filter(move |endpoint| !endpoint.flags.intersects(exclude))
    }

    /// Datacenters with at least one endpoint.
    pub fn dc_ids(&self) -> impl Iterator<Item = DcId> + '_ {
        self.entries.keys().copied()
    }

    /// Total number of endpoints.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether the table has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = EndpointFlags::OBFUSCATED.with(EndpointFlags::CHECKSUM);
        assert!(flags.contains(EndpointFlags::OBFUSCATED));
        assert!(flags.contains(EndpointFlags::CHECKSUM));
        assert!(!flags.contains(EndpointFlags::MEDIA_ONLY));
        assert!(flags.intersects(EndpointFlags::CHECKSUM.with(EndpointFlags::IPV6)));

        let flags = flags.without(EndpointFlags::CHECKSUM);
        assert_eq!(flags, EndpointFlags::OBFUSCATED);
        assert_eq!(EndpointFlags::from_byte(0x03).as_byte(), 0x03);
    }

    #[test]
    fn test_stream_mode_from_flags() {
        assert_eq!(
            Endpoint::new("10.0.0.1", 443, EndpointFlags::NONE).stream_mode(),
            StreamMode::Plain
        );
        assert_eq!(
            Endpoint::new("10.0.0.1", 443, EndpointFlags::OBFUSCATED).stream_mode(),
            StreamMode::Obfuscated
        );
        assert_eq!(
            Endpoint::new("10.0.0.1", 443, EndpointFlags::TCPO_ONLY).stream_mode(),
            StreamMode::Obfuscated
        );
        assert_eq!(StreamMode::Obfuscated.name(), "TCP-O");
    }

    #[test]
    fn test_obfuscated_detects_ipv6() {
        let v4 = Endpoint::obfuscated("149.154.167.51", 443);
        assert!(!v4.flags().contains(EndpointFlags::IPV6));
        assert_eq!(v4.to_string(), "149.154.167.51:443");

        let v6 = Endpoint::obfuscated("2001:db8::1", 443);
        assert!(v6.flags().contains(EndpointFlags::IPV6));
        assert_eq!(v6.to_string(), "[2001:db8::1]:443");
    }

    #[test]
    fn test_dc_options_order_and_dedup() {
        let mut options = DcOptions::new();
        assert!(options.is_empty());

        assert!(options.add(2, Endpoint::obfuscated("10.0.0.1", 443)));
        assert!(options.add(2, Endpoint::obfuscated("10.0.0.2", 80)));
        assert!(!options.add_discovered(2, "10.0.0.1", 443));
        assert!(options.add_discovered(4, "10.0.0.4", 5222));

        let hosts: Vec<_> = options.endpoints(2).iter().map(Endpoint::host).collect();
        assert_eq!(hosts, ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(options.len(), 3);
        assert_eq!(options.dc_ids().collect::<Vec<_>>(), [2, 4]);
        assert!(options.endpoints(9).is_empty());
    }

    #[test]
    fn test_dc_options_candidates_filter() {
        let mut options = DcOptions::new();
        options.add(1, Endpoint::new("10.0.0.1", 443, EndpointFlags::MEDIA_ONLY));
        options.add(1, Endpoint::obfuscated("10.0.0.2", 443));

        let candidates: Vec<_> = options
            .candidates(1, EndpointFlags::MEDIA_ONLY)
            .map(Endpoint::host)
            .collect();
        assert_eq!(candidates, ["10.0.0.2"]);
    }
}
