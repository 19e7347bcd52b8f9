//! The ballot state machine: pure transitions on a [`Snapshot`].
//!
//! ```text
//!   TurnDown ──(last Unknown ballot votes / reveal)──→ Open
//!       ↑                                               │
//!       └──────────────────(reset)──────────────────────┘
//! ```
//!
//! These functions touch nothing but the snapshot they are given. The
//! store-backed side (reading the latest snapshot, refreshing TTLs,
//! publishing the result) lives in [`RoomManager`](crate::RoomManager).

use planpoker_protocol::{Ballot, LoginId, Point, RoomState, Snapshot};

use crate::RoomError;

/// Gives `login_id` a ballot if it does not have one.
///
/// Returns `true` if a ballot was added. Entering twice never produces a
/// second ballot for the same login id.
pub fn enter(snapshot: &mut Snapshot, login_id: &LoginId) -> bool {
    if snapshot.ballot(login_id).is_some() {
        return false;
    }
    snapshot.ballots.push(Ballot::new(login_id.clone()));
    true
}

/// Removes every ballot held by `login_id`. Returns `true` if one was
/// removed. The room state is left alone.
pub fn leave(snapshot: &mut Snapshot, login_id: &LoginId) -> bool {
    let before = snapshot.ballots.len();
    snapshot.ballots.retain(|b| &b.login_id != login_id);
    snapshot.ballots.len() != before
}

/// Sets `login_id`'s card, and opens the room once nobody is left at
/// [`Point::Unknown`].
///
/// # Errors
/// - [`RoomError::InvalidState`] if the room is not `TurnDown`
/// - [`RoomError::BallotNotFound`] if `login_id` has no ballot
pub fn vote(snapshot: &mut Snapshot, login_id: &LoginId, point: Point) -> Result<(), RoomError> {
    require_turn_down(snapshot, "vote")?;

    let ballot = snapshot
        .ballots
        .iter_mut()
        .find(|b| &b.login_id == login_id)
        .ok_or_else(|| RoomError::BallotNotFound {
            room_id: snapshot.room_id.clone(),
            login_id: login_id.clone(),
        })?;
    ballot.point = point;

    if snapshot.all_voted() {
        snapshot.state = RoomState::Open;
    }
    Ok(())
}

/// Opens the room now, whatever the ballots hold.
///
/// # Errors
/// [`RoomError::InvalidState`] if the room is already `Open`.
pub fn reveal(snapshot: &mut Snapshot) -> Result<(), RoomError> {
    require_turn_down(snapshot, "count votes")?;
    snapshot.state = RoomState::Open;
    Ok(())
}

/// Starts a new round: back to `TurnDown`, every card back to `Unknown`
/// except `NotVote`, which carries over.
pub fn reset(snapshot: &mut Snapshot) {
    snapshot.state = RoomState::TurnDown;
    for ballot in &mut snapshot.ballots {
        if ballot.point != Point::NotVote {
            ballot.point = Point::Unknown;
        }
    }
}

fn require_turn_down(snapshot: &Snapshot, op: &'static str) -> Result<(), RoomError> {
    if snapshot.state == RoomState::TurnDown {
        Ok(())
    } else {
        Err(RoomError::InvalidState {
            room_id: snapshot.room_id.clone(),
            state: snapshot.state,
            op,
        })
    }
}
