//! Error types for the room layer.

use planpoker_protocol::{EntryId, LoginId, ProtocolError, RoomId, RoomState};
use planpoker_store::StoreError;

/// Errors that can occur during room operations.
///
/// Two variants are not failures in the usual sense. [`Left`] tells a
/// listener to stop, and [`Transient`] tells it to try again; a snapshot
/// stream absorbs both and never hands them to its consumer.
///
/// [`Left`]: RoomError::Left
/// [`Transient`]: RoomError::Transient
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (never created, expired, or deleted).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The login id has no ballot in the room.
    #[error("{login_id} has no ballot in room {room_id}")]
    BallotNotFound { room_id: RoomId, login_id: LoginId },

    /// The ballot state machine does not allow `op` in `state`.
    #[error("cannot {op} in room {room_id}: room is {state}")]
    InvalidState {
        room_id: RoomId,
        state: RoomState,
        op: &'static str,
    },

    /// The viewer is no longer a member of the room.
    #[error("{login_id} has left room {room_id}")]
    Left { room_id: RoomId, login_id: LoginId },

    /// A listener pull found nothing new within its wait interval.
    #[error("no new snapshot for room {0} yet")]
    Transient(RoomId),

    /// Another writer published between this operation's read and its
    /// publish. Only raised with `guard_publish` enabled.
    #[error("room {room_id} changed underneath this update (read {read}, now {current})")]
    Conflict {
        room_id: RoomId,
        read: EntryId,
        current: EntryId,
    },

    /// Every candidate room id was taken or could not be reserved.
    #[error("no free room id after {0} attempts")]
    IdExhausted(usize),

    /// A snapshot could not be encoded, or a stored one could not be
    /// decoded.
    #[error("bad snapshot for room {room_id}: {source}")]
    Protocol {
        room_id: RoomId,
        #[source]
        source: ProtocolError,
    },

    /// The shared store failed. `op` names the room operation that was
    /// running.
    #[error("{op} failed for room {room_id}: {source}")]
    Store {
        op: &'static str,
        room_id: RoomId,
        #[source]
        source: StoreError,
    },
}

impl RoomError {
    /// Returns `true` for the absent-entity kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BallotNotFound { .. })
    }

    /// Returns `true` if the operation should simply be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if a listener must stop pulling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Left { .. })
    }

    pub(crate) fn store(op: &'static str, room_id: &RoomId) -> impl FnOnce(StoreError) -> Self {
        let room_id = room_id.clone();
        move |source| Self::Store {
            op,
            room_id,
            source,
        }
    }

    pub(crate) fn protocol(room_id: &RoomId) -> impl FnOnce(ProtocolError) -> Self {
        let room_id = room_id.clone();
        move |source| Self::Protocol { room_id, source }
    }
}
