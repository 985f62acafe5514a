//! Envelope and message types.
//!
//! The envelope is the unit exchanged with the bridge. It carries the
//! routing address, an optional reply address for correlation, an opaque
//! body and optional headers.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::ReplyAddress;

// ============================================================================
// Types
// ============================================================================

/// Message headers, ordered so encoding is deterministic.
pub type Headers = BTreeMap<String, String>;

// ============================================================================
// EnvelopeType
// ============================================================================

/// Envelope type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Point-to-point message, optionally expecting a reply.
    Send,
    /// Broadcast to every handler of the address.
    Publish,
    /// Ask the bridge to forward messages for an address.
    Register,
    /// Stop forwarding messages for an address.
    Unregister,
    /// Failure notification from the bridge.
    Err,
    /// Message delivered by the bridge.
    Rec,
    /// Keepalive from the client.
    Ping,
    /// Keepalive answer from the bridge.
    Pong,
}

impl EnvelopeType {
    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Publish => "publish",
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Err => "err",
            Self::Rec => "rec",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Returns `true` if envelopes of this type must carry an address.
    #[inline]
    #[must_use]
    pub const fn requires_address(&self) -> bool {
        matches!(
            self,
            Self::Send | Self::Publish | Self::Register | Self::Unregister
        )
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A wire envelope.
///
/// # Format
///
/// ```json
/// {
///   "type": "send",
///   "address": "orders.create",
///   "replyAddress": "4a0c6f3e-...",
///   "body": { ... },
///   "headers": { "tenant": "acme" }
/// }
/// ```
///
/// `err` envelopes additionally carry `failureCode`, `failureType` and
/// `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope type.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,

    /// Target address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// Address a correlated reply should be sent to.
    #[serde(
        rename = "replyAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_address: Option<ReplyAddress>,

    /// Opaque message body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,

    /// Optional headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,

    /// Failure code (`err` only).
    #[serde(
        rename = "failureCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_code: Option<i32>,

    /// Failure type (`err` only).
    #[serde(
        rename = "failureType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_type: Option<String>,

    /// Failure message (`err` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Envelope - Constructors
// ============================================================================

impl Envelope {
    /// Creates an envelope of the given type with no optional fields set.
    #[must_use]
    pub fn new(kind: EnvelopeType, address: impl Into<String>, body: Value) -> Self {
        Self {
            kind,
            address: address.into(),
            reply_address: None,
            body,
            headers: None,
            failure_code: None,
            failure_type: None,
            message: None,
        }
    }

    /// Creates a `send` envelope.
    #[inline]
    #[must_use]
    pub fn send(address: impl Into<String>, body: Value) -> Self {
        Self::new(EnvelopeType::Send, address, body)
    }

    /// Creates a `publish` envelope.
    #[inline]
    #[must_use]
    pub fn publish(address: impl Into<String>, body: Value) -> Self {
        Self::new(EnvelopeType::Publish, address, body)
    }

    /// Creates a `register` envelope.
    #[inline]
    #[must_use]
    pub fn register(address: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Register, address, Value::Null)
    }

    /// Creates an `unregister` envelope.
    #[inline]
    #[must_use]
    pub fn unregister(address: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Unregister, address, Value::Null)
    }

    /// Creates a `ping` envelope.
    #[inline]
    #[must_use]
    pub fn ping() -> Self {
        Self::new(EnvelopeType::Ping, String::new(), Value::Null)
    }

    /// Creates an `err` envelope.
    #[must_use]
    pub fn err(
        address: impl Into<String>,
        failure_code: i32,
        failure_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failure_code: Some(failure_code),
            failure_type: Some(failure_type.into()),
            message: Some(message.into()),
            ..Self::new(EnvelopeType::Err, address, Value::Null)
        }
    }

    /// Sets the reply address.
    #[inline]
    #[must_use]
    pub fn with_reply_address(mut self, reply_address: ReplyAddress) -> Self {
        self.reply_address = Some(reply_address);
        self
    }

    /// Sets the headers. Empty header maps are omitted from the wire.
    #[inline]
    #[must_use]
    pub fn with_headers(mut self, headers: Option<Headers>) -> Self {
        self.headers = headers.filter(|h| !h.is_empty());
        self
    }
}

// ============================================================================
// Envelope - Accessors
// ============================================================================

impl Envelope {
    /// Checks the address invariant for outbound types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the type requires an address and
    /// none is set.
    pub fn validate(&self) -> Result<()> {
        if self.kind.requires_address() && self.address.is_empty() {
            return Err(Error::InvalidAddress {
                kind: self.kind.as_str(),
            });
        }
        Ok(())
    }

    /// Converts an `err` envelope into the matching [`Error::Reply`].
    #[must_use]
    pub fn to_reply_error(&self) -> Error {
        Error::Reply {
            failure_code: self.failure_code.unwrap_or(-1),
            failure_type: self
                .failure_type
                .clone()
                .unwrap_or_else(|| "RECIPIENT_FAILURE".to_string()),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string()),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An inbound message handed to consumers and request callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    address: String,
    reply_address: Option<ReplyAddress>,
    body: Value,
    headers: Headers,
}

impl Message {
    /// Returns the address the message was delivered to.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the address a reply should be sent to, if the sender wants one.
    #[inline]
    #[must_use]
    pub fn reply_address(&self) -> Option<&ReplyAddress> {
        self.reply_address.as_ref()
    }

    /// Returns the raw body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Deserializes the body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the body does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }

    /// Consumes the message and returns its body.
    #[inline]
    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        Self {
            address: envelope.address,
            reply_address: envelope.reply_address,
            body: envelope.body,
            headers: envelope.headers.unwrap_or_default(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
