//! Client connection options.
//!
//! [`ClientOptions`] is the immutable configuration snapshot a client is
//! built from: endpoint, TLS, proxy, frame limit, reconnect policy and
//! timeouts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use eventbus_client::{ClientOptions, ProxyOptions};
//!
//! let options = ClientOptions::new()
//!     .with_host("bridge.example.com")
//!     .with_port(7001)
//!     .with_path("/eventbus/websocket")
//!     .with_ssl(true)
//!     .with_max_frame_size(1024 * 1024)
//!     .with_proxy(ProxyOptions::http("proxy.example.com", 3128))
//!     .with_reply_timeout(Duration::from_secs(10));
//!
//! assert!(options.validate().is_ok());
//! assert_eq!(options.ws_url(), "wss://bridge.example.com:7001/eventbus/websocket");
//! ```
//!
//! Options can also be deserialized from JSON (camelCase keys, durations
//! in milliseconds):
//!
//! ```
//! use eventbus_client::ClientOptions;
//!
//! let options = ClientOptions::from_json(
//!     r#"{ "port": 7000, "maxFrameSize": 1024, "autoReconnect": false }"#,
//! ).unwrap();
//! assert_eq!(options.max_frame_size, 1024);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Headers;

// ============================================================================
// Constants
// ============================================================================

/// Default bridge host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default bridge port.
pub const DEFAULT_PORT: u16 = 80;

/// Default WebSocket path of the bridge endpoint.
pub const DEFAULT_PATH: &str = "/eventbus/websocket";

/// Default maximum frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

/// Default per-request reply timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default keepalive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default timeout for one connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default capacity of the pending-request table.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;

// ============================================================================
// ProxyType
// ============================================================================

/// Proxy protocol used to tunnel the bridge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// HTTP proxy using `CONNECT`.
    #[default]
    Http,

    /// SOCKS v5 proxy.
    #[serde(alias = "socks")]
    Socks5,
}

impl ProxyType {
    /// Returns the string representation.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks5 => "socks5",
        }
    }
}

// ============================================================================
// ProxyOptions
// ============================================================================

/// Proxy tunnel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Proxy type.
    #[serde(rename = "type", default)]
    pub proxy_type: ProxyType,

    /// Proxy hostname.
    pub host: String,

    /// Proxy port.
    pub port: u16,

    /// Username for authentication (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for authentication (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyOptions {
    /// Creates a new proxy configuration.
    #[must_use]
    pub fn new(proxy_type: ProxyType, host: impl Into<String>, port: u16) -> Self {
        Self {
            proxy_type,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Creates an HTTP `CONNECT` proxy configuration.
    #[inline]
    #[must_use]
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(ProxyType::Http, host, port)
    }

    /// Creates a SOCKS5 proxy configuration.
    #[inline]
    #[must_use]
    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self::new(ProxyType::Socks5, host, port)
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Returns the credentials if both parts are set.
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

// ============================================================================
// TlsOptions
// ============================================================================

/// TLS handshake settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsOptions {
    /// Connect over TLS (`wss`).
    #[serde(alias = "ssl")]
    pub enabled: bool,

    /// Accept any server certificate.
    pub trust_all: bool,

    /// Check that the certificate matches the host name.
    pub verify_host: bool,

    /// PEM file with extra trusted root certificates.
    pub trust_store: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            trust_all: false,
            verify_host: true,
            trust_store: None,
        }
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Bounded, jittered exponential backoff between connect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Upper bound for any delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Relative jitter in `[0, 1]`; `0.2` means ±20%.
    pub jitter: f64,

    /// Maximum consecutive failed attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_sample(attempt, rand::random::<f64>())
    }

    /// Returns the delay for `attempt` using `sample` in `[0, 1)` as the
    /// jitter source.
    #[must_use]
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max);
        let factor = 1.0 + self.jitter * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
        let delay = (base * factor).clamp(0.0, max);

        if delay.is_finite() {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }

    /// Returns `true` if another attempt is allowed after `failures`.
    #[inline]
    #[must_use]
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }

    fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::config("Reconnect multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::config("Reconnect jitter must be within [0, 1]"));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::config(
                "Reconnect initial delay must not exceed the maximum delay",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Client configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Bridge host.
    pub host: String,

    /// Bridge port.
    pub port: u16,

    /// WebSocket path of the bridge endpoint.
    #[serde(alias = "webSocketPath")]
    pub path: String,

    /// Maximum encoded envelope size in bytes.
    #[serde(alias = "maxWebSocketFrameSize")]
    pub max_frame_size: usize,

    /// TLS settings.
    pub tls: TlsOptions,

    /// Proxy tunnel, if any.
    pub proxy: Option<ProxyOptions>,

    /// Reconnect after failures and unexpected disconnects.
    pub auto_reconnect: bool,

    /// Backoff between connect attempts.
    pub reconnect: ReconnectPolicy,

    /// Default reply timeout for requests.
    #[serde(with = "millis")]
    pub reply_timeout: Duration,

    /// Keepalive interval; zero disables pings.
    #[serde(with = "millis")]
    pub ping_interval: Duration,

    /// Timeout for one complete connect attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Capacity of the pending-request table.
    pub max_pending_requests: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ClientOptions - Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tls: TlsOptions::default(),
            proxy: None,
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }

    /// Creates options from a `ws://`, `wss://`, `http://` or `https://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is malformed or uses another scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::config(format!("Invalid URL: {e}")))?;

        let ssl = match parsed.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => {
                return Err(Error::config(format!("Unsupported URL scheme: {other}")));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config("URL has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::config("URL has no port"))?;

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new()
            .with_host(host)
            .with_port(port)
            .with_path(path)
            .with_ssl(ssl))
    }

    /// Deserializes options from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// ClientOptions - Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the bridge host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bridge port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the WebSocket path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the maximum frame size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Enables or disables TLS.
    #[inline]
    #[must_use]
    pub fn with_ssl(mut self, enabled: bool) -> Self {
        self.tls.enabled = enabled;
        self
    }

    /// Accepts any server certificate.
    #[inline]
    #[must_use]
    pub fn with_trust_all(mut self, trust_all: bool) -> Self {
        self.tls.trust_all = trust_all;
        self
    }

    /// Enables or disables host name verification.
    #[inline]
    #[must_use]
    pub fn with_verify_host(mut self, verify_host: bool) -> Self {
        self.tls.verify_host = verify_host;
        self
    }

    /// Adds a PEM file of trusted root certificates.
    #[inline]
    #[must_use]
    pub fn with_trust_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.trust_store = Some(path.into());
        self
    }

    /// Tunnels the connection through a proxy.
    #[inline]
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the default reply timeout.
    #[inline]
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the keepalive ping interval. Zero disables pings.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the timeout for one connect attempt.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pending-request table capacity.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }
}

// ============================================================================
// ClientOptions - Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Returns the WebSocket URL of the bridge endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls.enabled { "wss" } else { "ws" };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{scheme}://{host}:{}{}", self.port, self.path)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("Host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("Port must be greater than zero"));
        }
        if !self.path.starts_with('/') {
            return Err(Error::config("WebSocket path must start with '/'"));
        }
        if self.max_frame_size == 0 {
            return Err(Error::config("Max frame size must be greater than zero"));
        }
        if self.reply_timeout.is_zero() {
            return Err(Error::config("Reply timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config(
                "Max pending requests must be greater than zero",
            ));
        }
        if let Some(proxy) = &self.proxy
            && (proxy.host.is_empty() || proxy.port == 0)
        {
            return Err(Error::config("Proxy host and port must be set"));
        }
        self.reconnect.validate()
    }
}

// ============================================================================
// DeliveryOptions
// ============================================================================

/// Per-message delivery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Headers attached to the envelope.
    pub headers: Headers,
    /// Reply timeout overriding [`ClientOptions::reply_timeout`].
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    /// Creates empty delivery options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the reply timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Duration Serialization
// ============================================================================

/// Serializes durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
