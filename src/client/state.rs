//! Connection state.
//!
//! Exactly one [`ConnectionState`] exists per client. The connection actor
//! is its only writer; handles read snapshots.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectingPhase
// ============================================================================

/// Step of an in-progress connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectingPhase {
    /// Waiting for the reconnect backoff to elapse.
    Backoff,
    /// Opening the TCP socket (to the proxy or the bridge).
    Dialing,
    /// Negotiating the proxy tunnel.
    ProxyHandshake,
    /// Negotiating TLS.
    TlsHandshake,
    /// Performing the WebSocket upgrade.
    WsUpgrade,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a client reached the `Closed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller called `close()`.
    Requested,
    /// A connect attempt failed and auto-reconnect is disabled.
    ConnectFailed(String),
    /// The reconnect attempt budget ran out.
    ReconnectExhausted(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("closed by caller"),
            Self::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            Self::ReconnectExhausted(reason) => write!(f, "reconnect attempts exhausted: {reason}"),
        }
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// A connect attempt (or its backoff) is in progress.
    Connecting(ConnectingPhase),
    /// The frame stream is open.
    Connected,
    /// `close()` is shutting the session down.
    Closing,
    /// Closed; `connect()` may be called again.
    Closed(CloseReason),
}

impl ConnectionState {
    /// Returns `true` if connected.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if a connect attempt is in progress.
    #[inline]
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    /// Returns `true` if closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting(phase) => write!(f, "connecting ({phase:?})"),
            Self::Connected => f.write_str("connected"),
            Self::Closing => f.write_str("closing"),
            Self::Closed(reason) => write!(f, "closed ({reason})"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
