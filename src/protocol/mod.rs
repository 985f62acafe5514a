//! Bridge wire protocol.
//!
//! This module defines the envelope exchanged with the bridge, the codec
//! seam used to serialize it, and the outbound frame size check.
//!
//! # Envelope Types
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `send` | Client → Bridge | Point-to-point message, optional reply address |
//! | `publish` | Client → Bridge | Broadcast message |
//! | `register` | Client → Bridge | Start receiving an address |
//! | `unregister` | Client → Bridge | Stop receiving an address |
//! | `ping` | Client → Bridge | Keepalive |
//! | `rec` | Bridge → Client | Delivered message or reply |
//! | `err` | Bridge → Client | Failure (request or access) |
//! | `pong` | Bridge → Client | Keepalive answer |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | [`Codec`] trait and [`JsonCodec`] |
//! | `envelope` | [`Envelope`] and [`Message`] |
//! | `frame` | Frame size check |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope serialization.
pub mod codec;

/// Envelope and message types.
pub mod envelope;

/// Outbound frame size check.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Codec, FrameKind, JsonCodec};
pub use envelope::{Envelope, EnvelopeType, Headers, Message};
