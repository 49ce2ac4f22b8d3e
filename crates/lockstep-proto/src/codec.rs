//! Length-delimited CBOR framing.
//!
//! Each frame is a big-endian `u32` body length followed by the CBOR encoding
//! of one message. The decoder is incremental: it consumes complete frames
//! from the front of a buffer and leaves partial ones in place.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum accepted body size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Append one framed message to `dst`.
pub fn encode<T: Serialize>(message: &T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(message, &mut body)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }
    let len = u32::try_from(body.len())
        .map_err(|_| ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE })?;

    dst.reserve(LENGTH_PREFIX_SIZE + body.len());
    dst.put_u32(len);
    dst.extend_from_slice(&body);
    Ok(())
}

/// Decode one message from the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a complete frame. On
/// success the frame is removed from `src`.
pub fn decode<T: DeserializeOwned>(src: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_be_bytes(prefix) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
    }

    let total = LENGTH_PREFIX_SIZE + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let body = src.split_to(len);
    let message =
        ciborium::de::from_reader(&body[..]).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(Some(message))
}
