//! Unified error type for planpoker.

use planpoker_protocol::ProtocolError;
use planpoker_room::RoomError;
use planpoker_session::SessionError;
use planpoker_store::StoreError;
use planpoker_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically. [`status_code`](Self::status_code) maps each
/// kind onto the code sent back in a `Response::Error`.
#[derive(Debug, thiserror::Error)]
pub enum PlanpokerError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (mismatch, store failure).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (not found, invalid state, conflict).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The shared store failed outside any session or room operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Startup configuration was malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request was well-formed JSON but not acceptable.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl PlanpokerError {
    /// The HTTP-style status code reported to clients.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Protocol(_) | Self::BadRequest(_) => 400,
            Self::Session(SessionError::PreconditionFailed(_)) => 412,
            Self::Session(SessionError::Contended(_)) => 409,
            Self::Room(e) if e.is_not_found() => 404,
            Self::Room(RoomError::InvalidState { .. } | RoomError::Conflict { .. }) => 409,
            _ => 500,
        }
    }
}
