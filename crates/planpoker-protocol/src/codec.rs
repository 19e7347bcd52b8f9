//! Codec trait and implementations for serializing/deserializing values.
//!
//! The same codec is used in two places: on the wire (envelopes sent over
//! a WebSocket) and inside the shared store (a [`Snapshot`](crate::Snapshot)
//! is stored as an opaque byte field of a log entry). Neither caller cares
//! HOW values are serialized, only that something implements [`Codec`].

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust values to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec is held by long-lived server
/// state and used from many connection tasks at once.
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

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps snapshots readable with `redis-cli XRANGE` and keeps wire
/// frames readable in browser DevTools, which matters more here than the
/// few bytes a binary format would save.
///
/// ## Example
///
/// ```rust
/// use planpoker_protocol::{Codec, JsonCodec, LoginId, RoomId, Snapshot};
///
/// let codec = JsonCodec;
/// let room_id: RoomId = "01234".parse().unwrap();
/// let snapshot = Snapshot::new(room_id, LoginId::from("alice"));
///
/// let bytes = codec.encode(&snapshot).unwrap();
/// let decoded: Snapshot = codec.decode(&bytes).unwrap();
/// assert_eq!(snapshot, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
