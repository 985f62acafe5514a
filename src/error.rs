//! Error types for the event-bus bridge client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use eventbus_client::{EventBusClient, Result};
//!
//! async fn example(client: &EventBusClient) -> Result<()> {
//!     let reply = client.request("greeter", "hello").await?;
//!     println!("{}", reply.body());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidAddress`] |
//! | Connection | [`Error::NotConnected`], [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Handshake | [`Error::ProxyTunnelFailed`], [`Error::TlsHandshakeFailed`] |
//! | Messaging | [`Error::FrameTooLarge`], [`Error::ReplyTimeout`], [`Error::Reply`], [`Error::TooManyPendingRequests`], [`Error::Unroutable`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Tls`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use rustls::Error as TlsError;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ReplyAddress;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// An address that must be non-empty was empty.
    #[error("Invalid address for '{kind}' envelope: address must not be empty")]
    InvalidAddress {
        /// Envelope type that required the address.
        kind: &'static str,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Operation attempted outside the `Connected` state.
    #[error("Not connected")]
    NotConnected,

    /// Transport connection failed.
    ///
    /// Returned when the socket or WebSocket upgrade cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A connect attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Pending work failed because the connection shut down or dropped.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The proxy refused or failed the tunnel handshake.
    #[error("Proxy tunnel failed: {message}")]
    ProxyTunnelFailed {
        /// Description of the proxy failure.
        message: String,
    },

    /// The TLS handshake with the bridge failed.
    #[error("TLS handshake failed: {message}")]
    TlsHandshakeFailed {
        /// Description of the TLS failure.
        message: String,
    },

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    /// Encoded envelope exceeds the maximum frame size.
    ///
    /// Raised before anything is written: the bridge drops oversized
    /// frames without replying.
    #[error("Frame too large: {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Encoded envelope size in bytes.
        size: usize,
        /// Configured maximum frame size.
        max: usize,
    },

    /// No correlated reply arrived within the deadline.
    #[error("Reply to {reply_address} timed out after {timeout_ms}ms")]
    ReplyTimeout {
        /// Reply address of the request that timed out.
        reply_address: ReplyAddress,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The bridge answered a request with an `err` envelope.
    #[error("Reply failure ({failure_type}, code {failure_code}): {message}")]
    Reply {
        /// Failure code reported by the bridge.
        failure_code: i32,
        /// Failure type reported by the bridge (e.g. `TIMEOUT`, `NO_HANDLERS`).
        failure_type: String,
        /// Failure message.
        message: String,
    },

    /// Pending-request table is at capacity.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPendingRequests {
        /// Requests currently in flight.
        pending: usize,
        /// Configured capacity.
        max: usize,
    },

    /// Inbound envelope matched no pending request or consumer.
    ///
    /// Only used for diagnostics; no caller ever receives it.
    #[error("Unroutable envelope for address: {address}")]
    Unroutable {
        /// Target address of the dropped envelope.
        address: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or undecodable frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a proxy tunnel error.
    #[inline]
    pub fn proxy_tunnel(message: impl Into<String>) -> Self {
        Self::ProxyTunnelFailed {
            message: message.into(),
        }
    }

    /// Creates a TLS handshake error.
    #[inline]
    pub fn tls_handshake(message: impl Into<String>) -> Self {
        Self::TlsHandshakeFailed {
            message: message.into(),
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Creates a reply timeout error.
    #[inline]
    pub fn reply_timeout(reply_address: ReplyAddress, timeout_ms: u64) -> Self {
        Self::ReplyTimeout {
            reply_address,
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::ReplyTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ProxyTunnelFailed { .. }
                | Self::TlsHandshakeFailed { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller retries.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ReplyTimeout { .. }
                | Self::TooManyPendingRequests { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
