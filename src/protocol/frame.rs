//! Outbound frame size enforcement.
//!
//! The bridge enforces its frame limit by closing the connection, never
//! with an error reply, so every encoded envelope is checked before it is
//! handed to the transport. The check is on the complete encoded envelope,
//! not the body alone.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Frame Sizer
// ============================================================================

/// Returns `true` if an encoded envelope fits in one frame.
///
/// A frame of exactly `max_frame_size` bytes fits.
#[inline]
#[must_use]
pub const fn fits(encoded: &[u8], max_frame_size: usize) -> bool {
    encoded.len() <= max_frame_size
}

/// Checks an encoded envelope against the frame limit.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] if the envelope does not fit.
#[inline]
pub fn ensure_fits(encoded: &[u8], max_frame_size: usize) -> Result<()> {
    if fits(encoded, max_frame_size) {
        Ok(())
    } else {
        Err(Error::frame_too_large(encoded.len(), max_frame_size))
    }
}

// ============================================================================
// Tests
// ============================================================================
