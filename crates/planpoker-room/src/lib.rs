//! Room synchronization for planpoker.
//!
//! A room is three keys in the shared store, all with the same sliding
//! TTL:
//!
//! ```text
//! planpoker_room:{id}         marker (value: master login id)
//! planpoker_room_member:{id}  set of login ids currently in the room
//! planpoker_room_stream:{id}  depth-1 log holding the latest Snapshot
//! ```
//!
//! Every mutation is a full read-modify-publish of the [`Snapshot`]:
//! read the latest entry, apply a pure transition from [`ballot`],
//! append the result as the log's only entry. Viewers follow the log
//! through a [`RoomListener`], which long-polls for entries newer than
//! its cursor.
//!
//! # Key types
//!
//! - [`RoomManager`]: the operations callers use (create, enter, vote, ...)
//! - [`RoomListener`]: a per-viewer cursor over one room's snapshot log
//! - [`RoomLifecycle`]: id allocation, TTL refresh, deletion, membership
//! - [`SnapshotLog`]: publishing and reading snapshots
//! - [`RoomConfig`]: TTLs, long-poll interval, retry limits
//!
//! # Concurrency
//!
//! Nothing here locks. Two concurrent mutations of the same room race:
//! each reads a snapshot and publishes its own modified copy, and the
//! later publish wins. [`RoomConfig::guard_publish`] turns the silent
//! overwrite into a [`RoomError::Conflict`] for the later writer.
//!
//! [`Snapshot`]: planpoker_protocol::Snapshot

pub mod ballot;
mod config;
mod error;
mod keys;
mod lifecycle;
mod listener;
mod log;
mod manager;

pub use config::RoomConfig;
pub use error::RoomError;
pub use keys::RoomKeys;
pub use lifecycle::RoomLifecycle;
pub use listener::RoomListener;
pub use log::SnapshotLog;
pub use manager::RoomManager;
