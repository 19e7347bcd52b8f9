//! Room manager: the room operations callers use.

use std::sync::Arc;

use planpoker_protocol::{EntryId, LoginId, Point, RoomId, RoomState, Snapshot};
use planpoker_store::StateStore;

use crate::{RoomConfig, RoomError, RoomLifecycle, RoomListener, SnapshotLog, ballot};

/// Runs room operations against the shared store.
///
/// Holds no room state of its own; every call reads what it needs from
/// the store, so any number of managers (on any number of nodes) can
/// serve the same rooms.
///
/// Mutations follow one pattern: refresh the room's TTL, read the latest
/// snapshot, apply a [`ballot`] transition, publish the result.
pub struct RoomManager<S: StateStore> {
    lifecycle: RoomLifecycle<S>,
    log: SnapshotLog<S>,
    config: RoomConfig,
}

impl<S: StateStore> RoomManager<S> {
    pub fn new(store: Arc<S>, config: RoomConfig) -> Self {
        Self {
            lifecycle: RoomLifecycle::new(Arc::clone(&store), config.clone()),
            log: SnapshotLog::new(store, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Creates a room with `master` recorded as its master and returns
    /// its id.
    pub async fn create(&self, master: &LoginId) -> Result<RoomId, RoomError> {
        let snapshot = self.lifecycle.create(master).await?;
        Ok(snapshot.room_id)
    }

    /// Returns `true` if the room has a snapshot, i.e. it has neither
    /// expired nor been deleted.
    pub async fn can_enter(&self, room_id: &RoomId) -> Result<bool, RoomError> {
        Ok(self.log.latest_id(room_id).await?.is_some())
    }

    /// Reads the room's current snapshot.
    pub async fn snapshot(&self, room_id: &RoomId) -> Result<(EntryId, Snapshot), RoomError> {
        self.log.read_latest(room_id).await
    }

    /// Joins `login_id` to the room and returns a listener whose first
    /// pull yields the room's latest snapshot.
    ///
    /// Entering again is harmless: membership is a set and the ballot
    /// list never gets a second entry for the same login id.
    ///
    /// If the ballot cannot be committed, a membership added by this call
    /// is taken back so the room never lists a member without a ballot.
    pub async fn enter(
        &self,
        room_id: &RoomId,
        login_id: &LoginId,
    ) -> Result<RoomListener<S>, RoomError> {
        self.lifecycle.refresh(room_id).await?;
        let added = self.lifecycle.add_member(room_id, login_id).await?;
        let committed = self
            .commit(room_id, |snapshot| {
                ballot::enter(snapshot, login_id);
                Ok(())
            })
            .await;
        if let Err(e) = committed {
            if added {
                if let Err(undo) = self.lifecycle.remove_member(room_id, login_id).await {
                    tracing::warn!(%room_id, %login_id, error = %undo, "failed to undo membership");
                }
            }
            return Err(e);
        }
        tracing::info!(%room_id, %login_id, "member entered");
        Ok(self.listener(room_id, login_id))
    }

    /// Attaches a listener without entering. It ends with `Left` unless
    /// `login_id` is already a member.
    pub fn listener(&self, room_id: &RoomId, login_id: &LoginId) -> RoomListener<S> {
        RoomListener::new(
            room_id.clone(),
            login_id.clone(),
            self.lifecycle.clone(),
            self.log.clone(),
            self.config.retry_backoff,
        )
    }

    /// Removes `login_id` from the room.
    ///
    /// When the last member leaves, the room is deleted and no further
    /// snapshot is published. Otherwise the leaver's ballot is pruned and
    /// everyone else's ballots and the room state are kept.
    pub async fn leave(&self, room_id: &RoomId, login_id: &LoginId) -> Result<(), RoomError> {
        self.lifecycle.refresh(room_id).await?;
        let remaining = self.lifecycle.remove_member(room_id, login_id).await?;
        tracing::info!(%room_id, %login_id, remaining, "member left");

        if remaining == 0 {
            return self.lifecycle.delete(room_id).await;
        }

        self.commit(room_id, |snapshot| {
            ballot::leave(snapshot, login_id);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Records `login_id`'s card. Opens the room if that was the last
    /// ballot still at `Unknown`.
    ///
    /// # Errors
    /// - [`RoomError::InvalidState`] if the room is `Open`
    /// - [`RoomError::BallotNotFound`] if `login_id` has no ballot
    pub async fn voting(
        &self,
        room_id: &RoomId,
        login_id: &LoginId,
        point: Point,
    ) -> Result<(), RoomError> {
        self.lifecycle.refresh(room_id).await?;
        let snapshot = self
            .commit(room_id, |snapshot| ballot::vote(snapshot, login_id, point))
            .await?;
        tracing::debug!(%room_id, %login_id, ?point, "vote recorded");
        if snapshot.state == RoomState::Open {
            tracing::info!(%room_id, "all votes in, room revealed");
        }
        Ok(())
    }

    /// Reveals all cards now, whatever the ballots hold.
    ///
    /// `login_id` identifies the caller for logging only; it does not
    /// need to be a member.
    ///
    /// # Errors
    /// [`RoomError::InvalidState`] if the room is already `Open`.
    pub async fn vote_counting(&self, room_id: &RoomId, login_id: &LoginId) -> Result<(), RoomError> {
        self.lifecycle.refresh(room_id).await?;
        self.commit(room_id, ballot::reveal).await?;
        tracing::info!(%room_id, %login_id, "room revealed");
        Ok(())
    }

    /// Starts a new round. `NotVote` ballots carry over; the rest go back
    /// to `Unknown`.
    pub async fn reset(&self, room_id: &RoomId) -> Result<(), RoomError> {
        self.lifecycle.refresh(room_id).await?;
        self.commit(room_id, |snapshot| {
            ballot::reset(snapshot);
            Ok(())
        })
        .await?;
        tracing::info!(%room_id, "room reset");
        Ok(())
    }

    /// Read-modify-publish of the room's snapshot.
    ///
    /// With `guard_publish` set, the log's current id is checked right
    /// before publishing and a publish that would overwrite someone
    /// else's update fails with `Conflict`. The check and the publish
    /// are still two separate store calls, so the window shrinks but
    /// does not close.
    async fn commit<F>(&self, room_id: &RoomId, apply: F) -> Result<Snapshot, RoomError>
    where
        F: FnOnce(&mut Snapshot) -> Result<(), RoomError>,
    {
        let (read, mut snapshot) = self.log.read_latest(room_id).await?;
        apply(&mut snapshot)?;

        if self.config.guard_publish {
            let current = self.log.latest_id(room_id).await?;
            if current != Some(read) {
                let current = current.unwrap_or(EntryId::ZERO);
                tracing::info!(%room_id, %read, %current, "publish rejected: room changed");
                return Err(RoomError::Conflict {
                    room_id: room_id.clone(),
                    read,
                    current,
                });
            }
        }

        self.log.publish(&snapshot).await?;
        Ok(snapshot)
    }
}
