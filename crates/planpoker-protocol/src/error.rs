//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating
/// protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// snapshot written by an incompatible version.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room code that is not exactly [`RoomId::LEN`](crate::RoomId::LEN)
    /// ASCII digits.
    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),

    /// A log entry id that is not of the form `{millis}-{seq}`.
    #[error("invalid entry id: {0:?}")]
    InvalidEntryId(String),

    /// The message is well-formed but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
