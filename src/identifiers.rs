//! Type-safe identifiers.
//!
//! Newtype wrappers keep reply-correlation addresses and consumer
//! registration handles from being mixed with plain strings.
//!
//! | Type | Wraps | Generated by |
//! |------|-------|--------------|
//! | [`ReplyAddress`] | `String` (UUID v4) | client, per request |
//! | [`RegistrationId`] | `Uuid` | client, per consumer |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ReplyAddress
// ============================================================================

/// Address a single correlated reply is sent to.
///
/// The bridge treats it as an ordinary address, so it is kept as a string;
/// the client only ever generates UUID-shaped values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyAddress(String);

impl ReplyAddress {
    /// Generates a fresh, unique reply address.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the address as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner string.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for ReplyAddress {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ReplyAddress {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for ReplyAddress {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ReplyAddress {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// RegistrationId
// ============================================================================

/// Handle identifying one consumer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Generates a new random registration ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
