use planpoker_protocol::RoomId;

const MARKER_PREFIX: &str = "planpoker_room";
const MEMBERS_PREFIX: &str = "planpoker_room_member";
const LOG_PREFIX: &str = "planpoker_room_stream";

/// The three store keys that make up one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKeys {
    /// Existence marker; holds the master login id.
    pub marker: String,
    /// Membership set.
    pub members: String,
    /// Depth-1 snapshot log.
    pub log: String,
}

impl RoomKeys {
    pub fn new(room_id: &RoomId) -> Self {
        Self {
            marker: format!("{MARKER_PREFIX}:{room_id}"),
            members: format!("{MEMBERS_PREFIX}:{room_id}"),
            log: format!("{LOG_PREFIX}:{room_id}"),
        }
    }
}
