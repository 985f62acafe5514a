//! Connection actor and event loop.
//!
//! One tokio task per client owns everything mutable: the connection
//! state, the pending-request table, the consumer registry, the current
//! frame stream and all timers. Client handles talk to it over a command
//! channel, so every transition happens in one serialized context.
//!
//! # Event Loop
//!
//! | Input | Handling |
//! |-------|----------|
//! | [`ConnectionCommand`] | connect, send, request, register, unregister, close |
//! | Inbound frame | decode, resolve a pending request or dispatch to consumers |
//! | Connect attempt finished | open the session or schedule a retry |
//! | Reconnect timer | start the next attempt |
//! | Reply deadline | time out expired requests |
//! | Keepalive tick | send a `ping` envelope |

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, trace, warn};

use crate::client::event::{ClientEvent, EVENT_CHANNEL_CAPACITY, EventSubscription};
use crate::client::options::ClientOptions;
use crate::client::state::{CloseReason, ConnectingPhase, ConnectionState};
use crate::error::{Error, Result};
use crate::identifiers::{RegistrationId, ReplyAddress};
use crate::protocol::{Codec, Envelope, EnvelopeType, FrameKind, Message, frame};

use super::pending::{PendingTable, ReplySender};
use super::registry::{ConsumerRegistry, MessageHandler};
use super::session::{Connector, FrameStream};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for the WebSocket close handshake on `close()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Frame Encoding
// ============================================================================

/// Encodes `envelope` into a WebSocket frame, enforcing the size limit.
///
/// # Errors
///
/// - [`Error::InvalidAddress`] if the envelope lacks a required address
/// - [`Error::FrameTooLarge`] if the encoded envelope exceeds `max_frame_size`
pub(crate) fn encode_frame(
    codec: &dyn Codec,
    envelope: &Envelope,
    max_frame_size: usize,
) -> Result<WsMessage> {
    envelope.validate()?;
    let bytes = codec.encode(envelope)?;
    frame::ensure_fits(&bytes, max_frame_size)?;

    match codec.frame_kind() {
        FrameKind::Text => String::from_utf8(bytes)
            .map(|text| WsMessage::Text(text.into()))
            .map_err(|_| Error::protocol("Text codec produced invalid UTF-8")),
        FrameKind::Binary => Ok(WsMessage::Binary(bytes.into())),
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
pub(crate) enum ConnectionCommand {
    /// Open the connection (or join the attempt in progress).
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    /// Write a fire-and-forget frame.
    Send {
        frame: WsMessage,
        done: oneshot::Sender<Result<()>>,
    },
    /// Write a frame and wait for the reply addressed to `reply_address`.
    Request {
        reply_address: ReplyAddress,
        frame: WsMessage,
        timeout: Duration,
        reply_tx: ReplySender,
    },
    /// Add a local consumer; `frame` is the encoded `register` envelope.
    Register {
        address: String,
        id: RegistrationId,
        handler: MessageHandler,
        frame: WsMessage,
        done: oneshot::Sender<Result<()>>,
    },
    /// Remove a local consumer.
    Unregister {
        address: String,
        id: RegistrationId,
        done: oneshot::Sender<bool>,
    },
    /// Close the client.
    Close { done: oneshot::Sender<()> },
}

// ============================================================================
// Shared
// ============================================================================

/// State readable from client handles.
struct Shared {
    state: RwLock<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Sending side of a connection actor.
///
/// The actor stops once every handle is dropped.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Queues a command for the actor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the actor has stopped.
    pub(crate) fn send(&self, command: ConnectionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Snapshot of the current state.
    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    /// Subscribes to lifecycle events.
    #[inline]
    pub(crate) fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.shared.events.subscribe())
    }

    /// Creates a handle that does not keep the actor alive.
    #[inline]
    pub(crate) fn downgrade(&self) -> WeakConnectionHandle {
        WeakConnectionHandle {
            command_tx: self.command_tx.downgrade(),
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// Non-owning counterpart of [`ConnectionHandle`].
#[derive(Clone)]
pub(crate) struct WeakConnectionHandle {
    command_tx: mpsc::WeakUnboundedSender<ConnectionCommand>,
    shared: Weak<Shared>,
}

impl WeakConnectionHandle {
    /// Returns a strong handle if the actor is still running.
    #[inline]
    pub(crate) fn upgrade(&self) -> Option<ConnectionHandle> {
        Some(ConnectionHandle {
            command_tx: self.command_tx.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

// ============================================================================
// Connection
// ============================================================================

/// An in-flight connect attempt.
struct Attempt {
    id: u64,
    task: JoinHandle<Result<FrameStream>>,
}

/// The connection actor.
pub(crate) struct Connection {
    options: Arc<ClientOptions>,
    codec: Arc<dyn Codec>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    pending: PendingTable,
    registry: ConsumerRegistry,
    session: Option<FrameStream>,
    attempt: Option<Attempt>,
    attempt_seq: u64,
    phase_tx: mpsc::UnboundedSender<(u64, ConnectingPhase)>,
    reconnect_at: Option<Instant>,
    keepalive: Option<Interval>,
    /// Failed attempts since the last successful connect.
    failures: u32,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Connection {
    /// Spawns the actor and returns its handle.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn(
        options: Arc<ClientOptions>,
        codec: Arc<dyn Codec>,
        connector: Arc<dyn Connector>,
    ) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Disconnected),
            events,
        });

        let connection = Self {
            pending: PendingTable::new(options.max_pending_requests),
            options,
            codec,
            connector,
            shared: Arc::clone(&shared),
            registry: ConsumerRegistry::default(),
            session: None,
            attempt: None,
            attempt_seq: 0,
            phase_tx,
            reconnect_at: None,
            keepalive: None,
            failures: 0,
            connect_waiters: Vec::new(),
        };

        tokio::spawn(connection.run(command_rx, phase_rx));

        ConnectionHandle { command_tx, shared }
    }

    /// Event loop.
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        mut phase_rx: mpsc::UnboundedReceiver<(u64, ConnectingPhase)>,
    ) {
        loop {
            let reply_deadline = self.pending.next_deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All client handles dropped");
                        break;
                    };
                    self.handle_command(command).await;
                }

                Some((id, phase)) = phase_rx.recv() => self.on_phase(id, phase),

                frame = next_frame(&mut self.session) => self.on_frame(frame),

                outcome = join_attempt(&mut self.attempt) => self.on_attempt_finished(outcome).await,

                () = sleep_until_some(reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_attempt();
                }

                () = sleep_until_some(reply_deadline) => {
                    self.pending.expire_sweep(Instant::now());
                }

                () = tick(&mut self.keepalive) => self.send_ping().await,
            }
        }

        self.close().await;
        debug!("Connection actor terminated");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { done } => self.on_connect_requested(done),

            ConnectionCommand::Send { frame, done } => {
                let result = self.write(frame).await;
                let _ = done.send(result);
            }

            ConnectionCommand::Request {
                reply_address,
                frame,
                timeout,
                reply_tx,
            } => self.on_request(reply_address, frame, timeout, reply_tx).await,

            ConnectionCommand::Register {
                address,
                id,
                handler,
                frame,
                done,
            } => {
                let result = self.on_register(address, id, handler, frame).await;
                let _ = done.send(result);
            }

            ConnectionCommand::Unregister { address, id, done } => {
                let removed = self.on_unregister(&address, id).await;
                let _ = done.send(removed);
            }

            ConnectionCommand::Close { done } => {
                self.close().await;
                let _ = done.send(());
            }
        }
    }

    fn on_connect_requested(&mut self, done: oneshot::Sender<Result<()>>) {
        match self.state() {
            ConnectionState::Connected => {
                let _ = done.send(Ok(()));
            }
            ConnectionState::Connecting(_) => self.connect_waiters.push(done),
            ConnectionState::Disconnected
            | ConnectionState::Closing
            | ConnectionState::Closed(_) => {
                self.connect_waiters.push(done);
                self.failures = 0;
                self.start_attempt();
            }
        }
    }

    async fn on_request(
        &mut self,
        reply_address: ReplyAddress,
        frame: WsMessage,
        timeout: Duration,
        reply_tx: ReplySender,
    ) {
        if self.session.is_none() {
            let _ = reply_tx.send(Err(Error::NotConnected));
            return;
        }

        if let Err((err, reply_tx)) = self.pending.register(reply_address, timeout, reply_tx) {
            warn!(error = %err, "Request rejected");
            let _ = reply_tx.send(Err(err));
            return;
        }

        // A failed write drains the table, failing this request too.
        let _ = self.write(frame).await;
    }

    /// Adds a consumer, registering its address on the bridge if it is the
    /// first one and a session is up. A failed write drops the consumer.
    async fn on_register(
        &mut self,
        address: String,
        id: RegistrationId,
        handler: MessageHandler,
        frame: WsMessage,
    ) -> Result<()> {
        let first = self.registry.add(&address, id, handler);
        debug!(%address, %id, first, "Consumer added");

        if first && self.session.is_some() && !self.registry.is_registered(&address) {
            if let Err(e) = self.write(frame).await {
                warn!(%address, error = %e, "Failed to register consumer on bridge");
                self.registry.remove(&address, id);
                return Err(e);
            }
            self.registry.mark_registered(&address);
        }
        Ok(())
    }

    async fn on_unregister(&mut self, address: &str, id: RegistrationId) -> bool {
        let Some(last) = self.registry.remove(address, id) else {
            return false;
        };
        debug!(address, %id, last, "Consumer removed");

        if last
            && self.registry.mark_unregistered(address)
            && let Err(e) = self.send_envelope(&Envelope::unregister(address)).await
        {
            warn!(address, error = %e, "Failed to unregister consumer on bridge");
        }
        true
    }

    /// Shuts everything down and reaches `Closed(Requested)`. Idempotent.
    async fn close(&mut self) {
        if self.state().is_closed() {
            return;
        }

        info!("Closing client");
        self.set_state(ConnectionState::Closing);

        if let Some(attempt) = self.attempt.take() {
            attempt.task.abort();
        }
        self.reconnect_at = None;
        self.keepalive = None;

        self.pending.drain_all(|| Error::ConnectionClosed);

        if let Some(mut session) = self.session.take() {
            match timeout(CLOSE_TIMEOUT, session.close()).await {
                Ok(Ok(())) => debug!("WebSocket closed"),
                Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
                Err(_) => debug!("WebSocket close timed out"),
            }
        }

        self.registry.clear_server_state();
        self.failures = 0;
        self.fail_connect_waiters(Error::ConnectionClosed);

        self.set_state(ConnectionState::Closed(CloseReason::Requested));
        self.emit(ClientEvent::Closed {
            reason: CloseReason::Requested,
        });
    }

    // ------------------------------------------------------------------------
    // Connect Attempts
    // ------------------------------------------------------------------------

    fn start_attempt(&mut self) {
        self.reconnect_at = None;
        self.attempt_seq += 1;

        let id = self.attempt_seq;
        let attempt = self.failures + 1;

        self.set_state(ConnectionState::Connecting(ConnectingPhase::Dialing));
        self.emit(ClientEvent::Connecting { attempt });
        info!(attempt, url = %self.options.ws_url(), "Connecting to bridge");

        let connector = Arc::clone(&self.connector);
        let options = Arc::clone(&self.options);
        let phase_tx = self.phase_tx.clone();

        let task = tokio::spawn(async move {
            let report = move |phase: ConnectingPhase| {
                let _ = phase_tx.send((id, phase));
            };
            let connect_timeout = options.connect_timeout;

            match timeout(connect_timeout, connector.connect(&options, &report)).await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_timeout(
                    connect_timeout.as_millis() as u64,
                )),
            }
        });

        self.attempt = Some(Attempt { id, task });
    }

    fn on_phase(&mut self, id: u64, phase: ConnectingPhase) {
        let current = self.attempt.as_ref().is_some_and(|attempt| attempt.id == id);
        if current && self.state().is_connecting() {
            trace!(?phase, "Connect phase");
            self.set_state(ConnectionState::Connecting(phase));
        }
    }

    async fn on_attempt_finished(
        &mut self,
        outcome: std::result::Result<Result<FrameStream>, JoinError>,
    ) {
        self.attempt = None;

        let result = outcome
            .unwrap_or_else(|e| Err(Error::connection(format!("Connect task failed: {e}"))));

        match result {
            Ok(stream) => self.on_connected(stream).await,
            Err(err) => self.on_connect_failed(err),
        }
    }

    async fn on_connected(&mut self, stream: FrameStream) {
        self.session = Some(stream);
        self.failures = 0;
        self.registry.clear_server_state();

        for address in self.registry.addresses() {
            if let Err(e) = self.send_envelope(&Envelope::register(address.as_str())).await {
                warn!(%address, error = %e, "Failed to re-register consumer");
                if self.session.is_none() {
                    return;
                }
                continue;
            }
            self.registry.mark_registered(&address);
        }

        self.keepalive = keepalive(self.options.ping_interval);
        self.set_state(ConnectionState::Connected);
        info!(
            url = %self.options.ws_url(),
            consumers = self.registry.len(),
            "Connected to bridge"
        );
        self.emit(ClientEvent::Connected);

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_connect_failed(&mut self, err: Error) {
        self.failures += 1;
        let message = err.to_string();
        warn!(attempt = self.failures, error = %err, "Connect attempt failed");
        self.emit(ClientEvent::TransportError {
            message: message.clone(),
        });

        if self.options.auto_reconnect && self.options.reconnect.allows(self.failures) {
            self.schedule_reconnect();
            return;
        }

        let reason = if self.options.auto_reconnect {
            CloseReason::ReconnectExhausted(message)
        } else {
            CloseReason::ConnectFailed(message)
        };

        self.fail_connect_waiters(err);
        self.set_state(ConnectionState::Closed(reason.clone()));
        self.emit(ClientEvent::Closed { reason });
    }

    fn schedule_reconnect(&mut self) {
        let attempt = self.failures + 1;
        let delay = self.options.reconnect.delay_for(attempt);
        self.reconnect_at = Some(Instant::now() + delay);

        self.set_state(ConnectionState::Connecting(ConnectingPhase::Backoff));
        debug!(attempt, ?delay, "Reconnect scheduled");
        self.emit(ClientEvent::ReconnectScheduled { attempt, delay });
    }

    fn fail_connect_waiters(&mut self, err: Error) {
        let message = err.to_string();
        let mut waiters = std::mem::take(&mut self.connect_waiters).into_iter();

        if let Some(first) = waiters.next() {
            let _ = first.send(Err(err));
        }
        for waiter in waiters {
            let _ = waiter.send(Err(Error::connection(message.clone())));
        }
    }

    // ------------------------------------------------------------------------
    // Session I/O
    // ------------------------------------------------------------------------

    /// Writes a frame. A write failure tears the session down.
    async fn write(&mut self, frame: WsMessage) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConnected);
        };

        if let Err(e) = session.send(frame).await {
            self.emit(ClientEvent::TransportError {
                message: e.to_string(),
            });
            self.on_session_lost(format!("write failed: {e}"));
            return Err(Error::WebSocket(e));
        }
        Ok(())
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = encode_frame(self.codec.as_ref(), envelope, self.options.max_frame_size)?;
        self.write(frame).await
    }

    async fn send_ping(&mut self) {
        match self.send_envelope(&Envelope::ping()).await {
            Ok(()) => trace!("Ping sent"),
            Err(e) => debug!(error = %e, "Ping failed"),
        }
    }

    fn on_frame(&mut self, frame: Option<std::result::Result<WsMessage, WsError>>) {
        match frame {
            Some(Ok(WsMessage::Text(text))) => self.on_payload(text.as_bytes()),
            Some(Ok(WsMessage::Binary(data))) => self.on_payload(&data),

            Some(Ok(WsMessage::Close(close))) => {
                let reason = close.map_or_else(
                    || "closed by bridge".to_string(),
                    |close| {
                        format!(
                            "closed by bridge: {} {}",
                            u16::from(close.code),
                            close.reason.as_str()
                        )
                    },
                );
                self.on_session_lost(reason);
            }

            // Control frames are answered by tungstenite.
            Some(Ok(_)) => {}

            Some(Err(e)) => {
                self.emit(ClientEvent::TransportError {
                    message: e.to_string(),
                });
                self.on_session_lost(format!("read failed: {e}"));
            }

            None => self.on_session_lost("stream ended".to_string()),
        }
    }

    fn on_payload(&mut self, bytes: &[u8]) {
        match self.codec.decode(bytes) {
            Ok(envelope) => self.route(envelope),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                self.emit(ClientEvent::TransportError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Routes an inbound envelope: pending request first, then consumers.
    fn route(&mut self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeType::Rec | EnvelopeType::Send | EnvelopeType::Publish => {
                if self.pending.contains(&envelope.address) {
                    let address = envelope.address.clone();
                    self.pending.resolve(&address, Ok(Message::from(envelope)));
                    return;
                }

                let message = Message::from(envelope);
                if self.registry.dispatch(&message) == 0 {
                    let err = Error::Unroutable {
                        address: message.address().to_string(),
                    };
                    warn!(error = %err, "Dropping message with no waiting request or consumer");
                }
            }

            EnvelopeType::Err => {
                if self.pending.contains(&envelope.address) {
                    let err = envelope.to_reply_error();
                    self.pending.resolve(&envelope.address, Err(err));
                    return;
                }

                let message = envelope
                    .message
                    .clone()
                    .or_else(|| envelope.body.as_str().map(str::to_string))
                    .unwrap_or_default();
                warn!(
                    address = %envelope.address,
                    failure_type = ?envelope.failure_type,
                    %message,
                    "Bridge reported an error"
                );
                self.emit(ClientEvent::BridgeError {
                    address: envelope.address,
                    failure_type: envelope.failure_type,
                    message,
                });
            }

            EnvelopeType::Pong => trace!("Pong received"),

            other => warn!(kind = other.as_str(), "Ignoring unexpected envelope from bridge"),
        }
    }

    /// Handles an unexpected end of the session.
    fn on_session_lost(&mut self, reason: String) {
        self.session = None;
        self.keepalive = None;
        self.registry.clear_server_state();

        let failed = self.pending.drain_all(|| Error::ConnectionClosed);
        warn!(%reason, failed, "Connection to bridge lost");

        if self.options.auto_reconnect {
            self.failures = 0;
            self.emit(ClientEvent::Disconnected { reason });
            self.schedule_reconnect();
        } else {
            self.fail_connect_waiters(Error::ConnectionClosed);
            self.set_state(ConnectionState::Disconnected);
            self.emit(ClientEvent::Disconnected { reason });
        }
    }

    // ------------------------------------------------------------------------
    // State & Events
    // ------------------------------------------------------------------------

    #[inline]
    fn state(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.shared.state.write(), state.clone());
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    #[inline]
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

// ============================================================================
// Select Helpers
// ============================================================================

async fn next_frame(
    session: &mut Option<FrameStream>,
) -> Option<std::result::Result<WsMessage, WsError>> {
    match session {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn join_attempt(
    attempt: &mut Option<Attempt>,
) -> std::result::Result<Result<FrameStream>, JoinError> {
    match attempt {
        Some(attempt) => (&mut attempt.task).await,
        None => pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

fn keepalive(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

// ============================================================================
// Tests
// ============================================================================
