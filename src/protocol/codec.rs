//! Pluggable envelope serialization.
//!
//! A [`Codec`] turns a whole [`Envelope`] (body included) into the bytes of
//! one WebSocket frame and back. The client is parametric over it; the
//! default is [`JsonCodec`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

use super::Envelope;

// ============================================================================
// FrameKind
// ============================================================================

/// WebSocket frame type a codec's output is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    /// UTF-8 text frames.
    #[default]
    Text,
    /// Binary frames.
    Binary,
}

// ============================================================================
// Codec
// ============================================================================

/// Envelope serialization format.
///
/// Implementations must be deterministic for a given envelope: the frame
/// size check runs on the exact bytes that are later written.
pub trait Codec: Send + Sync + fmt::Debug + 'static {
    /// Encodes an envelope into frame bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be represented.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    /// Decodes frame bytes into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope.
    fn decode(&self, frame: &[u8]) -> Result<Envelope>;

    /// Frame type used for encoded envelopes.
    fn frame_kind(&self) -> FrameKind {
        FrameKind::Text
    }
}

// ============================================================================
// JsonCodec
// ============================================================================

/// JSON codec matching the bridge's native wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, frame: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(frame)
            .map_err(|e| Error::protocol(format!("Invalid envelope: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
