//! Error types for the SWARMDROP framing codec.

use thiserror::Error;

/// Frame-level errors
///
/// Every variant means the same thing to the caller: the frame is malformed
/// and must be dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Empty buffer
    #[error("empty frame")]
    Empty,

    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown marker byte and not a legacy JSON control message
    #[error("invalid frame marker: 0x{0:02X}")]
    InvalidMarker(u8),

    /// Embedded JSON could not be decoded
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
}
