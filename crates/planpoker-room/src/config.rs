//! Room configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by every room operation.
///
/// Passed to [`RoomManager::new`](crate::RoomManager::new) and cloned into
/// each listener; nothing reads process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Sliding TTL of the room's three keys. Every mutating operation
    /// resets it.
    pub ttl: Duration,

    /// How long one listener pull blocks waiting for a newer snapshot.
    pub listen_block: Duration,

    /// Pause between listener pulls after one came back empty.
    pub retry_backoff: Duration,

    /// Candidate ids tried before room creation gives up.
    pub max_id_attempts: usize,

    /// Reject a publish when the log advanced since the snapshot being
    /// modified was read. Off means last write wins.
    pub guard_publish: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            listen_block: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(1),
            max_id_attempts: 64,
            guard_publish: false,
        }
    }
}
