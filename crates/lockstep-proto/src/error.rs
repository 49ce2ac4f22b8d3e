//! Protocol error types.

use thiserror::Error;

/// Errors from encoding or decoding protocol frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body exceeds [`crate::codec::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size announced by the length prefix or produced by the encoder.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),
}
