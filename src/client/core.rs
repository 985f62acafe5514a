//! Event-bus client handle.
//!
//! [`EventBusClient`] is a cheap, cloneable handle onto one connection
//! task. All clones share the same connection, pending requests and
//! consumers.
//!
//! Envelopes are encoded and size-checked in the caller's task, so an
//! oversized message fails with [`Error::FrameTooLarge`] before anything
//! reaches the connection.
//!
//! # Example
//!
//! ```no_run
//! use eventbus_client::{ClientOptions, EventBusClient};
//! use serde_json::json;
//!
//! # async fn example() -> eventbus_client::Result<()> {
//! let client = EventBusClient::from_options(ClientOptions::new().with_port(7000))?;
//! client.connect().await?;
//!
//! let registration = client
//!     .consumer("news.feed", |message| println!("{}", message.body()))
//!     .await?;
//!
//! client.publish("news.feed", json!({"headline": "hello"})).await?;
//! let reply = client.request("greeter", "world").await?;
//! println!("{}", reply.body());
//!
//! client.unregister(registration).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{RegistrationId, ReplyAddress};
use crate::protocol::{Codec, Envelope, EnvelopeType, Message};
use crate::transport::connection::{
    ConnectionCommand, ConnectionHandle, WeakConnectionHandle, encode_frame,
};

use super::builder::ClientBuilder;
use super::event::EventSubscription;
use super::options::{ClientOptions, DeliveryOptions};
use super::state::ConnectionState;

// ============================================================================
// Registration
// ============================================================================

/// Handle to a consumer added with [`EventBusClient::consumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    id: RegistrationId,
    address: String,
}

impl Registration {
    /// Returns the registration ID.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> RegistrationId {
        self.id
    }

    /// Returns the consumed address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

// ============================================================================
// EventBusClient
// ============================================================================

/// Client for an event-bus WebSocket bridge.
///
/// The connection task stops once every clone is dropped.
#[derive(Clone)]
pub struct EventBusClient {
    options: Arc<ClientOptions>,
    codec: Arc<dyn Codec>,
    connection: ConnectionHandle,
}

impl fmt::Debug for EventBusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusClient")
            .field("url", &self.options.ws_url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventBusClient - Construction
// ============================================================================

impl EventBusClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client with the default codec and connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid or no tokio
    /// runtime is running.
    pub fn from_options(options: ClientOptions) -> Result<Self> {
        ClientBuilder::new().options(options).build()
    }

    pub(crate) fn new(
        options: Arc<ClientOptions>,
        codec: Arc<dyn Codec>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            options,
            codec,
            connection,
        }
    }
}

// ============================================================================
// WeakEventBusClient
// ============================================================================

/// Client reference that does not keep the connection task alive.
///
/// Created with [`EventBusClient::downgrade`]. Meant for consumer handlers
/// that answer messages.
#[derive(Clone)]
pub struct WeakEventBusClient {
    options: Arc<ClientOptions>,
    codec: Arc<dyn Codec>,
    connection: WeakConnectionHandle,
}

impl WeakEventBusClient {
    /// Returns a usable client, or `None` once every [`EventBusClient`]
    /// has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventBusClient> {
        Some(EventBusClient {
            options: Arc::clone(&self.options),
            codec: Arc::clone(&self.codec),
            connection: self.connection.upgrade()?,
        })
    }
}

impl fmt::Debug for WeakEventBusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventBusClient")
            .field("url", &self.options.ws_url())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventBusClient - Lifecycle
// ============================================================================

impl EventBusClient {
    /// Returns the options this client was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns a snapshot of the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns `true` if the connection is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Creates a [`WeakEventBusClient`] for this connection.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakEventBusClient {
        WeakEventBusClient {
            options: Arc::clone(&self.options),
            codec: Arc::clone(&self.codec),
            connection: self.connection.downgrade(),
        }
    }

    /// Subscribes to lifecycle events.
    ///
    /// Events emitted before the call are not replayed.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.connection.subscribe()
    }

    /// Opens the connection.
    ///
    /// Resolves once connected. With auto-reconnect enabled, failed attempts
    /// are retried until one succeeds or the attempt budget runs out.
    /// Calling it while connected or connecting joins the current state.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempt (for example
    /// [`Error::ProxyTunnelFailed`] or [`Error::TlsHandshakeFailed`]) once
    /// the client gave up, or [`Error::ConnectionClosed`] if `close()` was
    /// called meanwhile.
    pub async fn connect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.connection.send(ConnectionCommand::Connect { done })?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Closes the connection.
    ///
    /// Every pending request fails with [`Error::ConnectionClosed`] before
    /// this returns. Local consumers are kept and re-registered on the next
    /// `connect()`. Idempotent.
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.connection.send(ConnectionCommand::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ============================================================================
// EventBusClient - Messaging
// ============================================================================

impl EventBusClient {
    /// Sends a point-to-point message without expecting a reply.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTooLarge`] if the encoded envelope exceeds the limit
    /// - [`Error::NotConnected`] if the connection is not open
    /// - [`Error::WebSocket`] if the write fails
    pub async fn send<T: Serialize>(&self, address: &str, body: T) -> Result<()> {
        self.send_with_options(address, body, DeliveryOptions::default())
            .await
    }

    /// Sends a point-to-point message with headers.
    ///
    /// # Errors
    ///
    /// See [`EventBusClient::send`].
    pub async fn send_with_options<T: Serialize>(
        &self,
        address: &str,
        body: T,
        options: DeliveryOptions,
    ) -> Result<()> {
        let envelope = Self::envelope(EnvelopeType::Send, address, body, options.headers)?;
        self.deliver(&envelope).await
    }

    /// Publishes a message to every consumer of `address`.
    ///
    /// Publishes are not retried after a reconnect.
    ///
    /// # Errors
    ///
    /// See [`EventBusClient::send`].
    pub async fn publish<T: Serialize>(&self, address: &str, body: T) -> Result<()> {
        self.publish_with_options(address, body, DeliveryOptions::default())
            .await
    }

    /// Publishes a message with headers.
    ///
    /// # Errors
    ///
    /// See [`EventBusClient::send`].
    pub async fn publish_with_options<T: Serialize>(
        &self,
        address: &str,
        body: T,
        options: DeliveryOptions,
    ) -> Result<()> {
        let envelope = Self::envelope(EnvelopeType::Publish, address, body, options.headers)?;
        self.deliver(&envelope).await
    }

    /// Sends a message and waits for its reply with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTooLarge`] if the encoded envelope exceeds the limit
    /// - [`Error::NotConnected`] if the connection is not open
    /// - [`Error::ReplyTimeout`] if no reply arrives in time
    /// - [`Error::Reply`] if the bridge answers with an `err` envelope
    /// - [`Error::ConnectionClosed`] if the connection drops or closes first
    /// - [`Error::TooManyPendingRequests`] if the pending table is full
    pub async fn request<T: Serialize>(&self, address: &str, body: T) -> Result<Message> {
        self.request_with_options(address, body, DeliveryOptions::default())
            .await
    }

    /// Sends a message and waits for its reply at most `timeout`.
    ///
    /// # Errors
    ///
    /// See [`EventBusClient::request`].
    pub async fn request_with_timeout<T: Serialize>(
        &self,
        address: &str,
        body: T,
        timeout: Duration,
    ) -> Result<Message> {
        self.request_with_options(address, body, DeliveryOptions::new().with_timeout(timeout))
            .await
    }

    /// Sends a message with headers and waits for its reply.
    ///
    /// # Errors
    ///
    /// See [`EventBusClient::request`].
    pub async fn request_with_options<T: Serialize>(
        &self,
        address: &str,
        body: T,
        options: DeliveryOptions,
    ) -> Result<Message> {
        let timeout = options.timeout.unwrap_or(self.options.reply_timeout);
        if timeout.is_zero() {
            return Err(Error::config("Reply timeout must be greater than zero"));
        }

        let reply_address = ReplyAddress::generate();
        let envelope = Self::envelope(EnvelopeType::Send, address, body, options.headers)?
            .with_reply_address(reply_address.clone());
        let frame = encode_frame(self.codec.as_ref(), &envelope, self.options.max_frame_size)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.connection.send(ConnectionCommand::Request {
            reply_address,
            frame,
            timeout,
            reply_tx,
        })?;

        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Answers a received message on its reply address.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if `message` does not expect a reply
    /// - otherwise see [`EventBusClient::send`]
    pub async fn reply<T: Serialize>(&self, message: &Message, body: T) -> Result<()> {
        let reply_address = message
            .reply_address()
            .ok_or_else(|| Error::protocol("Message does not expect a reply"))?;
        self.send(reply_address.as_str(), body).await
    }

    fn envelope<T: Serialize>(
        kind: EnvelopeType,
        address: &str,
        body: T,
        headers: crate::protocol::Headers,
    ) -> Result<Envelope> {
        let envelope = Envelope::new(kind, address, serde_json::to_value(body)?)
            .with_headers(Some(headers));
        envelope.validate()?;
        Ok(envelope)
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let frame = encode_frame(self.codec.as_ref(), envelope, self.options.max_frame_size)?;

        let (done, rx) = oneshot::channel();
        self.connection.send(ConnectionCommand::Send { frame, done })?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

// ============================================================================
// EventBusClient - Consumers
// ============================================================================

impl EventBusClient {
    /// Adds a consumer for `address`.
    ///
    /// The first consumer of an address registers it on the bridge (now if
    /// connected, otherwise on the next connect). Registrations survive
    /// reconnects. The handler runs on the connection task and must not
    /// block.
    ///
    /// A handler that answers messages should capture a
    /// [`WeakEventBusClient`] from [`EventBusClient::downgrade`]: a strong
    /// clone stored in the handler keeps the connection task alive.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `address` is empty
    /// - [`Error::FrameTooLarge`] if the `register` envelope exceeds the
    ///   maximum frame size
    /// - [`Error::WebSocket`] if writing the `register` envelope failed; the
    ///   consumer is not kept
    /// - [`Error::ConnectionClosed`] if the connection task has stopped
    pub async fn consumer<F>(&self, address: &str, handler: F) -> Result<Registration>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let frame = encode_frame(
            self.codec.as_ref(),
            &Envelope::register(address),
            self.options.max_frame_size,
        )?;

        let id = RegistrationId::generate();
        let (done, rx) = oneshot::channel();
        self.connection.send(ConnectionCommand::Register {
            address: address.to_string(),
            id,
            handler: Box::new(handler),
            frame,
            done,
        })?;
        rx.await.map_err(|_| Error::ConnectionClosed)??;

        debug!(address, %id, "Consumer registered");
        Ok(Registration {
            id,
            address: address.to_string(),
        })
    }

    /// Removes a consumer.
    ///
    /// Returns `false` if the registration was already removed. Removing
    /// the last consumer of an address unregisters it on the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection task has stopped.
    pub async fn unregister(&self, registration: Registration) -> Result<bool> {
        let (done, rx) = oneshot::channel();
        self.connection.send(ConnectionCommand::Unregister {
            address: registration.address,
            id: registration.id,
            done,
        })?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
