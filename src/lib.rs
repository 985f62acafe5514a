//! Event-bus bridge client - async Rust client for event-bus WebSocket bridges.
//!
//! This library connects to an event-bus bridge over WebSocket and lets
//! Rust code send, publish, request and consume messages on bus
//! addresses.
//!
//! # Architecture
//!
//! The client follows a handle/actor model:
//!
//! - **Handles** ([`EventBusClient`]): encode and size-check envelopes,
//!   then hand commands to the connection task
//! - **Connection task**: owns the connection state, the pending-request
//!   table, the consumer registry and the WebSocket
//!
//! Key design principles:
//!
//! - Oversized envelopes fail locally with [`Error::FrameTooLarge`]; the
//!   bridge would otherwise drop them silently
//! - Replies are correlated by generated reply addresses
//! - Optional HTTP CONNECT / SOCKS5 proxy tunnel and TLS
//! - Automatic reconnect with backoff; consumers are re-registered
//!
//! # Quick Start
//!
//! ```no_run
//! use eventbus_client::{ClientOptions, EventBusClient, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = EventBusClient::builder()
//!         .options(
//!             ClientOptions::new()
//!                 .with_host("localhost")
//!                 .with_port(7000)
//!                 .with_max_frame_size(1024 * 1024),
//!         )
//!         .build()?;
//!
//!     client.connect().await?;
//!
//!     client
//!         .consumer("news.feed", |message| println!("news: {}", message.body()))
//!         .await?;
//!
//!     let reply = client.request("greeter", json!({"name": "bus"})).await?;
//!     println!("reply: {}", reply.body());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Client handle, builder, options, state and events |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelopes, codecs and frame sizing |
//! | [`transport`] | Connection task, proxy, TLS and WebSocket session |

// ============================================================================
// Modules
// ============================================================================

/// Client handle, builder and configuration.
///
/// Use [`EventBusClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol: envelopes, codecs and frame sizing.
pub mod protocol;

/// Transport layer.
///
/// Connection task, proxy tunnels, TLS and the pluggable [`Connector`].
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientBuilder, ClientEvent, ClientOptions, CloseReason, ConnectingPhase, ConnectionState,
    DeliveryOptions, EventBusClient, EventSubscription, ProxyOptions, ProxyType, ReconnectPolicy,
    Registration, TlsOptions, WeakEventBusClient,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RegistrationId, ReplyAddress};

// Protocol types
pub use protocol::{Codec, Envelope, EnvelopeType, FrameKind, Headers, JsonCodec, Message};

// Transport types
pub use transport::{Connector, FrameStream, PhaseReporter, WebSocketConnector};
