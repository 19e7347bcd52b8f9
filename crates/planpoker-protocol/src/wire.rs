//! Wire messages exchanged between a client and the server.
//!
//! Every frame is an [`Envelope`]. The client picks the `id`; the server
//! echoes it on every response to that request, including each snapshot
//! of an `EnterRoom` stream, so one connection can run a stream and issue
//! ordinary requests at the same time.
//!
//! Bodies are internally tagged (`#[serde(tag = "type")]`):
//!
//! ```text
//! → { "id": 3, "body": { "type": "Voting", "room_id": "01234", "login_id": "alice", "point": "Five" } }
//! ← { "id": 3, "body": { "type": "Ok" } }
//! ```

use serde::{Deserialize, Serialize};

use crate::{EntryId, LoginId, Point, RoomId, Session, Snapshot};

/// A request or response tagged with the client-chosen correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, body: T) -> Self {
        Self { id, body }
    }
}

/// Client → Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a session, or renew it when `session_id` matches (or is
    /// absent/empty).
    Login {
        login_id: LoginId,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Drop the session. Idempotent.
    Logout { login_id: LoginId },

    /// Create a room with `login_id` recorded as its master.
    CreateRoom { login_id: LoginId },

    /// Ask whether a room still exists.
    CanEnterRoom { room_id: RoomId },

    /// Join a room and start streaming its snapshots under this
    /// envelope's id.
    EnterRoom { room_id: RoomId, login_id: LoginId },

    LeaveRoom { room_id: RoomId, login_id: LoginId },

    Voting {
        room_id: RoomId,
        login_id: LoginId,
        point: Point,
    },

    /// Reveal all cards now, even if some are still `Unknown`.
    VoteCounting { room_id: RoomId, login_id: LoginId },

    ResetRoom { room_id: RoomId },

    /// Stop the `EnterRoom` stream that was started with id `stream`.
    Cancel { stream: u64 },

    /// Liveness probe; the server pings its store.
    Health,
}

/// Why a snapshot stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EndReason {
    /// The viewer is no longer a member of the room.
    Left,
    /// The client cancelled the stream or the server is shutting down.
    Cancelled,
}

/// Server → Client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    LoggedIn { session: Session },

    /// The request succeeded and has nothing to return.
    Ok,

    RoomCreated { room_id: RoomId },

    CanEnterRoom { can_enter: bool },

    /// One item of an `EnterRoom` stream.
    Snapshot { entry_id: EntryId, snapshot: Snapshot },

    /// The `EnterRoom` stream is over. Sent once, never followed by more
    /// snapshots for the same id.
    StreamEnded { reason: EndReason },

    Health { serving: bool },

    /// The request failed. `code` follows HTTP conventions (400 bad
    /// request, 404 not found, 409 conflict, 412 precondition failed,
    /// 500 internal).
    Error { code: u16, message: String },
}
