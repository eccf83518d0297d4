//! Binary encoding of push-channel events.
//!
//! Events are serialized with postcard, one event per WebSocket binary frame.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Largest frame either side accepts by default (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds the size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Encodes an event into a byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an event from a byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an event after checking the frame against `max` bytes.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` if `bytes` is longer than `max`,
/// otherwise the same errors as [`decode`].
pub fn decode_bounded<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{ClientEvent, ServerEvent};

    #[test]
    fn decode_empty_bytes_fails() {
        assert!(decode::<ServerEvent>(&[]).is_err());
    }

    #[test]
    fn decode_corrupted_bytes_fails() {
        assert!(decode::<ClientEvent>(&[0xFF, 0xFE, 0xFD, 0xFC]).is_err());
    }

    #[test]
    fn bounded_decode_rejects_oversized_frame() {
        let bytes = encode(&ClientEvent::Hello {
            user_id: "x".repeat(100),
        })
        .unwrap();
        let result = decode_bounded::<ClientEvent>(&bytes, 16);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { max: 16, .. })));
    }

    #[test]
    fn bounded_decode_accepts_frame_within_limit() {
        let event = ClientEvent::PingUser {
            target_user_id: "igi".into(),
        };
        let bytes = encode(&event).unwrap();
        let decoded: ClientEvent = decode_bounded(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded, event);
    }
}
