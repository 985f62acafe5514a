//! Transport layer.
//!
//! Everything between the client handle and the bridge socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   commands    ┌──────────────────────────────┐
//! │  EventBusClient  │──────────────►│  Connection (actor task)     │
//! │  (handles)       │◄──────────────│  PendingTable                │
//! └──────────────────┘ replies/acks  │  ConsumerRegistry            │
//!                                    │  FrameStream ◄── Connector   │
//!                                    └──────────────┬───────────────┘
//!                                                   │ WebSocket
//!                                                   ▼
//!                                            event-bus bridge
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection actor and event loop |
//! | `pending` | Reply-address correlation table |
//! | `proxy` | HTTP CONNECT and SOCKS5 tunnels |
//! | `registry` | Local consumers and bridge registrations |
//! | `session` | One connect attempt: dial, tunnel, TLS, upgrade |
//! | `tls` | rustls connector setup |

// ============================================================================
// Submodules
// ============================================================================

/// Connection actor and event loop.
pub(crate) mod connection;

/// Pending-request table.
pub(crate) mod pending;

/// Proxy tunnel handshakes.
pub mod proxy;

/// Consumer registry.
pub(crate) mod registry;

/// Transport session and the connector seam.
pub mod session;

/// TLS setup.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use registry::MessageHandler;
pub use session::{BoxedIo, Connector, FrameIo, FrameStream, Io, PhaseReporter, WebSocketConnector};
