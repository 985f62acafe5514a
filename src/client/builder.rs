//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`EventBusClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use eventbus_client::{ClientOptions, EventBusClient};
//!
//! # async fn example() -> eventbus_client::Result<()> {
//! let client = EventBusClient::builder()
//!     .options(ClientOptions::new().with_host("bridge.local").with_port(7000))
//!     .build()?;
//!
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{Codec, JsonCodec};
use crate::transport::connection::Connection;
use crate::transport::{Connector, WebSocketConnector};

use super::core::EventBusClient;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring an [`EventBusClient`].
///
/// Use [`EventBusClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Connection options.
    options: ClientOptions,
    /// Envelope codec (JSON if unset).
    codec: Option<Arc<dyn Codec>>,
    /// Transport connector (WebSocket if unset).
    connector: Option<Arc<dyn Connector>>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("codec", &self.codec)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses options parsed from a bridge URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid.
    pub fn url(mut self, url: &str) -> Result<Self> {
        self.options = ClientOptions::from_url(url)?;
        Ok(self)
    }

    /// Sets the envelope codec.
    #[inline]
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Sets the transport connector.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Validates the options and starts the client's connection task.
    ///
    /// The client starts `Disconnected`; call
    /// [`EventBusClient::connect`] to open the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build(self) -> Result<EventBusClient> {
        self.options.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config(
                "EventBusClient must be built inside a tokio runtime",
            ));
        }

        let options = Arc::new(self.options);
        let codec = self.codec.unwrap_or_else(|| Arc::new(JsonCodec));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));

        debug!(url = %options.ws_url(), ?codec, "Building event bus client");

        let connection = Connection::spawn(Arc::clone(&options), Arc::clone(&codec), connector);
        Ok(EventBusClient::new(options, codec, connection))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::client::state::ConnectionState;

    #[test]
    fn test_new_uses_defaults() {
        let builder = ClientBuilder::new();
        assert_eq!(builder.options, ClientOptions::new());
        assert!(builder.codec.is_none());
        assert!(builder.connector.is_none());
    }

    #[test]
    fn test_url_sets_options() {
        let builder = ClientBuilder::new()
            .url("ws://bridge.local:7000/eventbus/websocket")
            .expect("valid url");
        assert_eq!(builder.options.host, "bridge.local");
        assert_eq!(builder.options.port, 7000);
    }

    #[test]
    fn test_build_rejects_invalid_options() {
        let result = ClientBuilder::new()
            .options(ClientOptions::new().with_max_frame_size(0))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_starts_disconnected() {
        let client = ClientBuilder::new().build().expect("build");
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
