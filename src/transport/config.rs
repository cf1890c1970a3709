//! Transport configuration.

use std::time::Duration;

use zeroize::Zeroizing;

use crate::core::{
    ConfigError, DEFAULT_COMMAND_QUEUE_SIZE, DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_GUARD_TIMEOUT,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_BUFFER_SIZE, MAX_ACK_SEQ, MAX_GUARD_TIMEOUT,
    MAX_PAYLOAD_SIZE,
};

/// Transport configuration.
#[derive(Clone)]
pub struct TransportConfig {
    /// Pre-shared secret mixed into the keystream keys (may be empty).
    pub secret: Zeroizing<Vec<u8>>,

    /// Sequence value the handshake acknowledgement must carry (at most `MAX_ACK_SEQ`).
    pub expected_ack_seq: u32,

    /// Initial guard timeout for the connect + handshake phases.
    pub guard_timeout: Duration,

    /// Cap for the guard timeout after repeated timeouts.
    pub max_guard_timeout: Duration,

    /// Largest payload accepted by `send` and by the frame decoder.
    pub max_frame_size: usize,

    /// Socket read chunk size.
    pub read_buffer_size: usize,

    /// Received frames queued for the session layer before reads pause.
    pub event_queue_size: usize,

    /// Outgoing frames queued before `send` reports a full queue.
    pub command_queue_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            secret: Zeroizing::new(Vec::new()),
            expected_ack_seq: 0,
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
            max_guard_timeout: MAX_GUARD_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            command_queue_size: DEFAULT_COMMAND_QUEUE_SIZE,
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("secret", &"[REDACTED]")
            .field("expected_ack_seq", &self.expected_ack_seq)
            .field("guard_timeout", &self.guard_timeout)
            .field("max_guard_timeout", &self.max_guard_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("event_queue_size", &self.event_queue_size)
            .field("command_queue_size", &self.command_queue_size)
            .finish()
    }
}

impl TransportConfig {
    /// Check the configuration for values the transport cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guard_timeout.is_zero() {
            return Err(ConfigError::ZeroGuardTimeout);
        }
        if self.max_guard_timeout < self.guard_timeout {
            return Err(ConfigError::GuardTimeoutCap {
                initial: self.guard_timeout,
                max: self.max_guard_timeout,
            });
        }
        if self.max_frame_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::FrameSizeLimit(self.max_frame_size));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroReadBuffer);
        }
        if self.expected_ack_seq > MAX_ACK_SEQ {
            return Err(ConfigError::AckSequenceRange(self.expected_ack_seq));
        }
        if self.event_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize("event"));
        }
        if self.command_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize("command"));
        }
        Ok(())
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pre-shared secret.
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.config.secret = Zeroizing::new(secret.into());
        self
    }

    /// Set the expected handshake acknowledgement sequence value.
    pub fn expected_ack_seq(mut self, seq: u32) -> Self {
        self.config.expected_ack_seq = seq;
        self
    }

    /// Set the initial guard timeout.
    pub fn guard_timeout(mut self, timeout: Duration) -> Self {
        self.config.guard_timeout = timeout;
        self
    }

    /// Set the guard timeout cap.
    pub fn max_guard_timeout(mut self, timeout: Duration) -> Self {
        self.config.max_guard_timeout = timeout;
        self
    }

    /// Set the frame size limit.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the socket read chunk size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set how many received frames may wait for the session layer.
    pub fn event_queue_size(mut self, size: usize) -> Self {
        self.config.event_queue_size = size;
        self
    }

    /// Set how many outgoing frames may wait for the socket.
    pub fn command_queue_size(mut self, size: usize) -> Self {
        self.config.command_queue_size = size;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
