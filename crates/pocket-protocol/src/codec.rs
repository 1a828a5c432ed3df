//! Codec trait and the JSON implementation used on the control channel.
//!
//! The transport hands us whole frames; a codec turns a frame into a
//! [`ControlMessage`](crate::ControlMessage) and back. Keeping this behind a
//! trait means the server and client never name `serde_json` directly.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses UTF-8 JSON (via `serde_json`).
///
/// ```rust
/// use pocket_protocol::{Codec, ControlBody, ControlMessage, JsonCodec};
///
/// let codec = JsonCodec;
/// let msg = ControlMessage::from_body(&ControlBody::Leave).unwrap();
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: ControlMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
