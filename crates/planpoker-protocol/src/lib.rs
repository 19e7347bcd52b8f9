//! Shared vocabulary for planpoker.
//!
//! This crate defines the data every other layer talks about:
//!
//! - **Identifiers** ([`LoginId`], [`RoomId`], [`EntryId`]): who is voting,
//!   which room, and where a listener's cursor sits in the snapshot log.
//! - **Room state** ([`Snapshot`], [`Ballot`], [`Point`], [`RoomState`]) —
//!   the full serialized state of a room, published as one unit.
//! - **Wire messages** ([`Envelope`], [`Request`], [`Response`]): what
//!   travels between a client and the server.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those values become
//!   bytes, both on the wire and inside the shared store.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session / Room (store-backed)
//! ```

mod codec;
mod error;
mod types;
mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    Ballot, EntryId, LoginId, Point, RoomId, RoomState, Session, Snapshot,
};
pub use wire::{EndReason, Envelope, Request, Response};
