//! Transport layer error types.
//!
//! Every error raised by a running connection is terminal for that connection:
//! it is reported once, the state becomes `Failed`, and nothing is retried.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::connection::ConnectionState;
use super::frame::FrameError;

/// Failures before the hello packet is on the wire.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Socket could not be opened or written.
    #[error("socket connect failed: {0}")]
    Socket(#[source] io::Error),

    /// Remote closed the connection before acknowledging the hello packet.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// `connect` was called outside a tokio runtime.
    #[error("no async runtime available")]
    NoRuntime,
}

/// Violations of the wire protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Malformed or corrupted frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Handshake acknowledgement carried the wrong sequence value.
    #[error("handshake sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch {
        /// Sequence value the session layer expects.
        expected: u32,
        /// Sequence value received.
        actual: u32,
    },

    /// Handshake acknowledgement too short to carry a sequence value.
    #[error("handshake acknowledgement of {0} bytes is too short")]
    ShortAck(usize),

    /// Hello packet did not decrypt to the protocol tag.
    #[error("hello packet carries an invalid protocol tag")]
    BadHelloTag,
}

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure before the handshake.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Guard timer expired before the connection became ready.
    #[error("connection not ready after {after:?}")]
    Timeout {
        /// Guard timeout that elapsed.
        after: Duration,
    },

    /// Protocol desync or malformed input.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket error on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Relay answered with an error code frame.
    #[error("relay error code {code}")]
    Remote {
        /// Negative code sent by the relay (e.g. -404, -429).
        code: i32,
    },

    /// Remote closed an established connection.
    #[error("connection closed by remote")]
    Closed,

    /// Operation not allowed in the current state.
    #[error("operation invalid in state {state:?}")]
    InvalidState {
        /// State at the time of the call.
        state: ConnectionState,
    },
}

impl TransportError {
    /// Stable numeric code for the error kind.
    ///
    /// Relay error codes are passed through unchanged.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Connect(_) => 1,
            TransportError::Timeout { .. } => 2,
            TransportError::Protocol(_) => 3,
            TransportError::Io(_) => 4,
            TransportError::Closed => 5,
            TransportError::InvalidState { .. } => 6,
            TransportError::Remote { code } => *code,
        }
    }

    /// Check if this error ended a connection (as opposed to a rejected call).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::InvalidState { .. })
    }

    /// Check if this error is a guard timer expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Errors returned by `Transport::send`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not ready for application frames.
    #[error("transport not ready (state {0:?})")]
    NotReady(ConnectionState),

    /// Payload exceeds the configured frame size limit.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Payload length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Outgoing queue is full; the socket is not keeping up.
    #[error("send queue full")]
    QueueFull,

    /// The connection task has already ended.
    #[error("transport closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
