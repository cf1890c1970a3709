//! Framed TCP transport: connection state machine and socket driver.
//!
//! A [`Transport`] handle owns at most one driver task. The task is the only
//! place where the socket, the keystreams and the frame decoder are touched;
//! the handle talks to it through a command channel and observes it through
//! [`TransportEvent`]s delivered in order.
//!
//! Both channels are bounded. Once `event_queue_size` frames are waiting for
//! the session layer the driver stops reading the socket until one is taken.
//! A few slots beyond that are kept free for state changes and errors.
//!
//! ```text
//! Disconnected -> Connecting -> WaitingHandshakeAck -> Ready
//!                      \               \                |
//!                       +---------------+--> Failed <---+
//!                                                       |
//!                                 Disconnected <--------+ (disconnect)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::crypto::CipherKeyPair;

use super::config::TransportConfig;
use super::endpoint::Endpoint;
use super::error::{ConnectError, ProtocolError, SendError, TransportError, TransportResult};
use super::frame::{encode_frame, FrameDecoder};
use super::handshake::Hello;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection attempt in progress.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Hello packet sent, waiting for the relay's acknowledgement frame.
    WaitingHandshakeAck,
    /// Application frames may flow.
    Ready,
    /// The connection ended with an error.
    Failed,
}

impl ConnectionState {
    /// Whether a driver task is working on this connection.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::WaitingHandshakeAck | ConnectionState::Ready
        )
    }

    /// Whether the guard timer applies.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::WaitingHandshakeAck
        )
    }
}

/// Notifications delivered to the session layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete decrypted frame payload.
    FrameReceived(Vec<u8>),
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The connection failed. Delivered once per failure.
    Error(TransportError),
}

/// Receiving half of a transport's event stream.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Event slots frames may not take, reserved for state changes and errors.
const CONTROL_HEADROOM: usize = 4;

enum Command {
    Send(Vec<u8>),
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    generation: u64,
    timed_out: bool,
}

/// Event emitter bound to one connection attempt.
///
/// Emission is dropped once the handle moves on to another generation, so a
/// disconnected or replaced attempt can never report anything afterward.
///
/// Queue capacity is reserved before the state lock is taken, and the event is
/// only committed under the lock, so a stale attempt never slips one in.
#[derive(Clone)]
struct EventSink {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::Sender<TransportEvent>,
    generation: u64,
}

impl EventSink {
    /// Deliver a frame, waiting while the session layer lags.
    async fn emit_frame(&self, frame: Vec<u8>) {
        let Ok(mut permits) = self.events.reserve_many(CONTROL_HEADROOM + 1).await else {
            return;
        };

        let shared = self.shared.lock();
        if shared.generation == self.generation {
            if let Some(permit) = permits.next() {
                permit.send(TransportEvent::FrameReceived(frame));
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let Ok(permit) = self.events.reserve().await else {
            return;
        };

        let mut shared = self.shared.lock();
        if shared.generation != self.generation || shared.state == state {
            return;
        }
        debug!(from = ?shared.state, to = ?state, "transport state change");
        shared.state = state;
        permit.send(TransportEvent::StateChanged(state));
    }

    async fn fail(&self, error: TransportError) {
        let Ok(mut permits) = self.events.reserve_many(2).await else {
            return;
        };

        let mut shared = self.shared.lock();
        if shared.generation != self.generation || shared.state == ConnectionState::Failed {
            return;
        }
        warn!(%error, code = error.code(), "transport failed");
        shared.state = ConnectionState::Failed;
        shared.timed_out = error.is_timeout();
        if let (Some(state), Some(report)) = (permits.next(), permits.next()) {
            state.send(TransportEvent::StateChanged(ConnectionState::Failed));
            report.send(TransportEvent::Error(error));
        }
    }
}

/// Client transport for one relay connection at a time.
///
/// Must be used from within a tokio runtime.
pub struct Transport {
    config: TransportConfig,
    guard_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::Sender<TransportEvent>,
    commands: Option<mpsc::Sender<Command>>,
    driver: Option<JoinHandle<()>>,
    endpoint: Option<Endpoint>,
}

impl Transport {
    /// Create a disconnected transport and its event stream.
    pub fn new(config: TransportConfig) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::channel(config.event_queue_size.max(1) + CONTROL_HEADROOM);
        let transport = Self {
            guard_timeout: config.guard_timeout,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                generation: 0,
                timed_out: false,
            })),
            events,
            commands: None,
            driver: None,
            endpoint: None,
        };
        (transport, receiver)
    }

    /// Start connecting to `endpoint`.
    ///
    /// Only valid while `Disconnected`. Progress and failures are reported
    /// through the event stream.
    pub fn connect(&mut self, endpoint: Endpoint) -> TransportResult<()> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(TransportError::InvalidState { state });
        }
        self.launch(endpoint)
    }

    /// Start a fresh attempt after a disconnect or a failure.
    ///
    /// All per-connection state is rebuilt. If the previous attempt timed
    /// out, the guard timeout doubles up to the configured cap.
    pub fn reconnect(&mut self, endpoint: Endpoint) -> TransportResult<()> {
        let (state, timed_out) = {
            let shared = self.shared.lock();
            (shared.state, shared.timed_out)
        };
        if state.is_active() {
            return Err(TransportError::InvalidState { state });
        }

        if timed_out {
            self.guard_timeout = self
                .guard_timeout
                .saturating_mul(2)
                .min(self.config.max_guard_timeout);
            debug!(guard_timeout = ?self.guard_timeout, "guard timeout backed off");
        }
        self.launch(endpoint)
    }

    fn launch(&mut self, endpoint: Endpoint) -> TransportResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::Connect(ConnectError::NoRuntime))?;

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }

        let generation = {
            let mut shared = self.shared.lock();
            shared.generation = shared.generation.wrapping_add(1);
            shared.timed_out = false;
            debug!(from = ?shared.state, to = ?ConnectionState::Connecting, "transport state change");
            shared.state = ConnectionState::Connecting;
            self.notify(ConnectionState::Connecting);
            shared.generation
        };

        let (commands, command_rx) = mpsc::channel(self.config.command_queue_size.max(1));
        let driver = Driver {
            decoder: FrameDecoder::new(endpoint.uses_checksum(), self.config.max_frame_size),
            endpoint: endpoint.clone(),
            config: self.config.clone(),
            guard_timeout: self.guard_timeout,
            sink: EventSink {
                shared: Arc::clone(&self.shared),
                events: self.events.clone(),
                generation,
            },
            commands: command_rx,
            keys: None,
            awaiting_ack: true,
        };

        debug!(%endpoint, mode = endpoint.stream_mode().name(), "connecting");
        self.driver = Some(runtime.spawn(driver.run()));
        self.commands = Some(commands);
        self.endpoint = Some(endpoint);
        Ok(())
    }

    /// Queue `payload` as one frame.
    ///
    /// Only valid while `Ready`. Never waits: a full command queue is
    /// reported as [`SendError::QueueFull`]. Nothing is retried; a frame
    /// queued just before a failure is lost.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), SendError> {
        let payload = payload.into();

        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(SendError::NotReady(state));
        }
        if payload.len() > self.config.max_frame_size {
            return Err(SendError::TooLarge {
                len: payload.len(),
                max: self.config.max_frame_size,
            });
        }

        let commands = self.commands.as_ref().ok_or(SendError::Closed)?;
        commands
            .try_send(Command::Send(payload))
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Close the connection. Idempotent; a `Failed` state is left as is.
    pub fn disconnect(&mut self) {
        self.commands = None;

        let mut shared = self.shared.lock();
        shared.generation = shared.generation.wrapping_add(1);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }

        if shared.state.is_active() {
            debug!(from = ?shared.state, "disconnecting");
            shared.state = ConnectionState::Disconnected;
            self.notify(ConnectionState::Disconnected);
        }
    }

    /// Report a state change made by the handle itself.
    ///
    /// Uses the reserved headroom; the event is only lost if the session
    /// layer stopped draining the queue altogether.
    fn notify(&self, state: ConnectionState) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.events.try_send(TransportEvent::StateChanged(state))
        {
            warn!(?state, "event queue full, state change not delivered");
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Endpoint of the current or last attempt.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Guard timeout the next attempt will use.
    pub fn guard_timeout(&self) -> Duration {
        self.guard_timeout
    }

    /// Short transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.endpoint
            .as_ref()
            .map_or("TCP", |endpoint| endpoint.stream_mode().name())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("endpoint", &self.endpoint)
            .field("guard_timeout", &self.guard_timeout)
            .finish()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Per-attempt connection task.
struct Driver {
    endpoint: Endpoint,
    config: TransportConfig,
    guard_timeout: Duration,
    sink: EventSink,
    commands: mpsc::Receiver<Command>,
    decoder: FrameDecoder,
    keys: Option<CipherKeyPair>,
    awaiting_ack: bool,
}

impl Driver {
    async fn run(mut self) {
        let deadline = Instant::now() + self.guard_timeout;

        match self.establish(deadline).await {
            Ok(stream) => {
                if let Err(error) = self.pump(stream, deadline).await {
                    self.decoder.reset();
                    self.sink.fail(error).await;
                }
            }
            Err(error) => self.sink.fail(error).await,
        }
    }

    async fn establish(&mut self, deadline: Instant) -> TransportResult<TcpStream> {
        let connect = TcpStream::connect((self.endpoint.host(), self.endpoint.port()));
        let mut stream = timeout_at(deadline, connect)
            .await
            .map_err(|_| self.timeout())?
            .map_err(ConnectError::Socket)?;
        stream.set_nodelay(true).map_err(ConnectError::Socket)?;

        let hello = Hello::generate(self.endpoint.stream_mode(), &self.config.secret, &mut OsRng);
        timeout_at(deadline, stream.write_all(&hello.wire))
            .await
            .map_err(|_| self.timeout())?
            .map_err(ConnectError::Socket)?;
        trace!(len = hello.wire.len(), "hello packet sent");

        self.keys = hello.keys;
        self.sink.set_state(ConnectionState::WaitingHandshakeAck).await;
        Ok(stream)
    }

    async fn pump(&mut self, mut stream: TcpStream, deadline: Instant) -> TransportResult<()> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let guard = sleep_until(deadline);
        tokio::pin!(guard);

        loop {
            tokio::select! {
                _ = &mut guard, if self.awaiting_ack => {
                    return Err(self.timeout());
                }
                read = stream.read(&mut buf) => match read {
                    Ok(0) if self.awaiting_ack => {
                        return Err(ConnectError::ClosedDuringHandshake.into());
                    }
                    Ok(0) => return Err(TransportError::Closed),
                    Ok(n) => self.on_readable(&mut buf[..n]).await?,
                    Err(error) if self.awaiting_ack => {
                        return Err(ConnectError::Socket(error).into());
                    }
                    Err(error) => return Err(TransportError::Io(error)),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(payload)) => self.write_frame(&mut stream, &payload).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn on_readable(&mut self, data: &mut [u8]) -> TransportResult<()> {
        if let Some(keys) = self.keys.as_mut() {
            keys.decrypt(data);
        }

        let mut frames = Vec::new();
        let decoded = self.decoder.decode(data, &mut frames);
        for frame in frames {
            self.on_frame(frame).await?;
        }
        decoded.map_err(ProtocolError::from)?;
        Ok(())
    }

    async fn on_frame(&mut self, frame: Vec<u8>) -> TransportResult<()> {
        if self.awaiting_ack {
            return self.on_ack(&frame).await;
        }

        if let Some(code) = remote_error_code(&frame) {
            return Err(TransportError::Remote { code });
        }

        trace!(len = frame.len(), "frame received");
        self.sink.emit_frame(frame).await;
        Ok(())
    }

    /// The expected sequence is matched before the frame is read as an error
    /// code, so an ack is never mistaken for one.
    async fn on_ack(&mut self, frame: &[u8]) -> TransportResult<()> {
        let expected = self.config.expected_ack_seq;
        if let Some(seq) = frame.get(..4) {
            let actual = u32::from_le_bytes([seq[0], seq[1], seq[2], seq[3]]);
            if actual == expected {
                self.awaiting_ack = false;
                self.sink.set_state(ConnectionState::Ready).await;
                return Ok(());
            }
        }

        if let Some(code) = remote_error_code(frame) {
            return Err(TransportError::Remote { code });
        }
        match frame.get(..4) {
            Some(seq) => {
                let actual = u32::from_le_bytes([seq[0], seq[1], seq[2], seq[3]]);
                Err(ProtocolError::SequenceMismatch { expected, actual }.into())
            }
            None => Err(ProtocolError::ShortAck(frame.len()).into()),
        }
    }

    async fn write_frame(&mut self, stream: &mut TcpStream, payload: &[u8]) -> TransportResult<()> {
        let mut wire = encode_frame(payload, self.endpoint.uses_checksum()).map_err(ProtocolError::from)?;
        if let Some(keys) = self.keys.as_mut() {
            keys.encrypt(&mut wire);
        }

        stream.write_all(&wire).await?;
        trace!(payload = payload.len(), wire = wire.len(), "frame sent");
        Ok(())
    }

    fn timeout(&self) -> TransportError {
        TransportError::Timeout {
            after: self.guard_timeout,
        }
    }
}

/// A 4-byte frame holding a negative LE32 is a relay error code.
fn remote_error_code(frame: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = frame.try_into().ok()?;
    let code = i32::from_le_bytes(bytes);
    (code < 0).then_some(code)
}
