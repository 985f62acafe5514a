//! Client lifecycle events.
//!
//! Every client owns one ordered broadcast channel of [`ClientEvent`]s.
//! [`EventSubscription`] is a receiver on it; dropping the subscription
//! cancels it.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::state::CloseReason;

// ============================================================================
// Constants
// ============================================================================

/// Buffered events per subscriber before the slowest one starts lagging.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// ClientEvent
// ============================================================================

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connect attempt started.
    Connecting {
        /// 1-based attempt number since the last successful connect.
        attempt: u32,
    },

    /// The session is open and consumers are re-registered.
    Connected,

    /// An established session dropped unexpectedly.
    Disconnected {
        /// Description of the cause.
        reason: String,
    },

    /// A retry was scheduled after a failure.
    ReconnectScheduled {
        /// Attempt number of the upcoming retry.
        attempt: u32,
        /// Delay before it starts.
        delay: Duration,
    },

    /// The client reached the `Closed` state.
    Closed {
        /// Why it closed.
        reason: CloseReason,
    },

    /// A transport-level failure (failed attempt, write error, bad frame).
    TransportError {
        /// Description of the failure.
        message: String,
    },

    /// The bridge sent an `err` envelope no request was waiting for.
    BridgeError {
        /// Address the error refers to.
        address: String,
        /// Failure type reported by the bridge.
        failure_type: Option<String>,
        /// Failure message.
        message: String,
    },
}

// ============================================================================
// EventSubscription
// ============================================================================

/// Receiver for [`ClientEvent`]s.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<ClientEvent>,
}

impl EventSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<ClientEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the client is gone. Events missed because this
    /// subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
