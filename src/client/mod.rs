//! Event-bus client.
//!
//! This module provides the public entry point for talking to a bridge.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventBusClient`] | Cloneable client handle |
//! | [`WeakEventBusClient`] | Handle that does not keep the connection alive |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Endpoint, TLS, proxy, limits and timeouts |
//! | [`ConnectionState`] | Lifecycle state |
//! | [`ClientEvent`] | Lifecycle notification |
//! | [`Registration`] | Consumer handle |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Client handle.
pub mod core;

/// Lifecycle events.
pub mod event;

/// Client options.
pub mod options;

/// Connection state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::{EventBusClient, Registration, WeakEventBusClient};
pub use event::{ClientEvent, EventSubscription};
pub use options::{ClientOptions, DeliveryOptions, ProxyOptions, ProxyType, ReconnectPolicy, TlsOptions};
pub use state::{CloseReason, ConnectingPhase, ConnectionState};
