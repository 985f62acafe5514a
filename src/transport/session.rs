//! Transport session: one physical connect attempt.
//!
//! ```text
//! TCP dial ──► proxy tunnel? ──► TLS? ──► WebSocket upgrade ──► FrameStream
//! ```
//!
//! The session carries frames only. The configured max frame size bounds
//! inbound frames here; outbound envelopes are checked before they reach
//! the connection actor.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace};

use crate::client::options::ClientOptions;
use crate::client::state::ConnectingPhase;
use crate::error::{Error, Result};

use super::{proxy, tls};

// ============================================================================
// Types
// ============================================================================

/// Byte stream the WebSocket runs over (plain TCP or TLS).
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed [`Io`].
pub type BoxedIo = Box<dyn Io>;

/// Bidirectional WebSocket frame stream.
pub trait FrameIo:
    Stream<Item = std::result::Result<WsMessage, WsError>>
    + Sink<WsMessage, Error = WsError>
    + Send
    + Unpin
{
}

impl<T> FrameIo for T where
    T: Stream<Item = std::result::Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + Unpin
{
}

/// Boxed [`FrameIo`] produced by a [`Connector`].
pub type FrameStream = Box<dyn FrameIo>;

/// Callback a connector reports its progress through.
pub type PhaseReporter<'a> = &'a (dyn Fn(ConnectingPhase) + Send + Sync);

// ============================================================================
// Connector
// ============================================================================

/// Opens transport sessions.
///
/// The connection actor calls [`Connector::connect`] once per attempt. The
/// default implementation is [`WebSocketConnector`]; other implementations
/// can be injected through the client builder.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Runs one complete connect attempt.
    ///
    /// # Errors
    ///
    /// Returns the handshake error of the failing phase.
    async fn connect(&self, options: &ClientOptions, report: PhaseReporter<'_>)
    -> Result<FrameStream>;
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// TCP + optional proxy + optional TLS + WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        options: &ClientOptions,
        report: PhaseReporter<'_>,
    ) -> Result<FrameStream> {
        let host = options.host.as_str();
        let port = options.port;

        report(ConnectingPhase::Dialing);
        let stream = match &options.proxy {
            Some(proxy_options) => {
                let proxy_addr = (proxy_options.host.as_str(), proxy_options.port);
                let mut socket = TcpStream::connect(proxy_addr).await.map_err(|e| {
                    Error::proxy_tunnel(format!(
                        "Cannot reach proxy {}:{}: {e}",
                        proxy_options.host, proxy_options.port
                    ))
                })?;

                report(ConnectingPhase::ProxyHandshake);
                proxy::handshake(&mut socket, proxy_options, host, port).await?;
                socket
            }
            None => TcpStream::connect((host, port))
                .await
                .map_err(|e| Error::connection(format!("Cannot reach {host}:{port}: {e}")))?,
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        let io: BoxedIo = if options.tls.enabled {
            report(ConnectingPhase::TlsHandshake);
            let connector = tls::connector(&options.tls)?;
            Box::new(tls::handshake(&connector, host, stream).await?)
        } else {
            Box::new(stream)
        };

        report(ConnectingPhase::WsUpgrade);
        let url = options.ws_url();
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::config(format!("Invalid bridge URL {url}: {e}")))?;

        let config = WebSocketConfig::default()
            .max_frame_size(Some(options.max_frame_size))
            .max_message_size(Some(options.max_frame_size));

        let (ws_stream, response) =
            tokio_tungstenite::client_async_with_config(request, io, Some(config))
                .await
                .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        debug!(%url, status = %response.status(), "WebSocket upgrade completed");

        Ok(Box::new(ws_stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
