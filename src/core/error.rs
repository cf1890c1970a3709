//! Error types shared across the crate.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Guard timeout must be non-zero.
    #[error("guard timeout must be non-zero")]
    ZeroGuardTimeout,

    /// Guard timeout cap is below the initial guard timeout.
    #[error("max guard timeout {max:?} is below guard timeout {initial:?}")]
    GuardTimeoutCap {
        /// Initial guard timeout.
        initial: Duration,
        /// Configured cap.
        max: Duration,
    },

    /// Frame size limit exceeds what the wire format can describe.
    #[error("max frame size {0} exceeds protocol limit")]
    FrameSizeLimit(usize),

    /// Read buffer must be non-empty.
    #[error("read buffer size must be non-zero")]
    ZeroReadBuffer,

    /// Handshake acknowledgement sequence would read as a relay error code.
    #[error("expected ack sequence {0:#010x} exceeds {max:#010x}", max = i32::MAX)]
    AckSequenceRange(u32),

    /// A channel capacity must be non-zero.
    #[error("{0} queue size must be non-zero")]
    ZeroQueueSize(&'static str),

    /// A discovery URL is empty.
    #[error("discovery url for {0} is empty")]
    EmptyUrl(&'static str),
}
