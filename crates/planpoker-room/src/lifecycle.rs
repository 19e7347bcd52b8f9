//! Room lifecycle: id allocation, sliding TTL, deletion, and membership.

use std::sync::Arc;

use planpoker_protocol::{LoginId, RoomId, Snapshot};
use planpoker_store::StateStore;

use crate::{RoomConfig, RoomError, RoomKeys, SnapshotLog};

/// Creates, refreshes, and deletes the store keys that make up a room.
pub struct RoomLifecycle<S: StateStore> {
    store: Arc<S>,
    log: SnapshotLog<S>,
    config: RoomConfig,
}

impl<S: StateStore> Clone for RoomLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            log: self.log.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: StateStore> RoomLifecycle<S> {
    pub fn new(store: Arc<S>, config: RoomConfig) -> Self {
        let log = SnapshotLog::new(Arc::clone(&store), config.clone());
        Self { store, log, config }
    }

    /// Creates a room owned by `master` and publishes its initial
    /// snapshot (`TurnDown`, no ballots).
    pub async fn create(&self, master: &LoginId) -> Result<Snapshot, RoomError> {
        self.create_with(master, RoomId::generate).await
    }

    /// Like [`create`](Self::create), drawing candidate ids from
    /// `next_id` instead of the thread-local RNG.
    pub async fn create_with<F>(&self, master: &LoginId, next_id: F) -> Result<Snapshot, RoomError>
    where
        F: FnMut() -> RoomId + Send,
    {
        let room_id = self.allocate(master, next_id).await?;
        let snapshot = Snapshot::new(room_id, master.clone());
        self.log.publish(&snapshot).await?;
        tracing::info!(room_id = %snapshot.room_id, master = %master, "room created");
        Ok(snapshot)
    }

    /// Reserves a fresh room id by writing its marker with
    /// `set_if_absent`.
    ///
    /// A taken id and a failed reservation are both treated as "not
    /// free": the loop only stops on a reservation the store confirmed.
    /// A failed reservation may still have landed, in which case the
    /// orphaned marker simply expires.
    async fn allocate<F>(&self, master: &LoginId, mut next_id: F) -> Result<RoomId, RoomError>
    where
        F: FnMut() -> RoomId + Send,
    {
        for attempt in 1..=self.config.max_id_attempts {
            let candidate = next_id();
            let marker = RoomKeys::new(&candidate).marker;
            match self
                .store
                .set_if_absent(&marker, master.as_str(), self.config.ttl)
                .await
            {
                Ok(true) => return Ok(candidate),
                Ok(false) => {
                    tracing::debug!(room_id = %candidate, attempt, "room id taken, regenerating");
                }
                Err(e) => {
                    tracing::warn!(
                        room_id = %candidate,
                        attempt,
                        error = %e,
                        "room id reservation failed, regenerating"
                    );
                }
            }
        }
        Err(RoomError::IdExhausted(self.config.max_id_attempts))
    }

    /// Resets the TTL of the room's marker, membership set, and log.
    ///
    /// The three `expire` calls run concurrently and the first failure
    /// fails the refresh. A membership set or log that does not exist
    /// yet is fine; a missing marker means the room is gone.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the marker has expired or was deleted.
    pub async fn refresh(&self, room_id: &RoomId) -> Result<(), RoomError> {
        let keys = RoomKeys::new(room_id);
        let ttl = self.config.ttl;
        let (marker, _, _) = tokio::try_join!(
            self.store.expire(&keys.marker, ttl),
            self.store.expire(&keys.members, ttl),
            self.store.expire(&keys.log, ttl),
        )
        .map_err(RoomError::store("refresh", room_id))?;

        if !marker {
            return Err(RoomError::NotFound(room_id.clone()));
        }
        Ok(())
    }

    /// Removes all three keys of the room.
    pub async fn delete(&self, room_id: &RoomId) -> Result<(), RoomError> {
        let keys = RoomKeys::new(room_id);
        tokio::try_join!(
            self.store.delete(&keys.marker),
            self.store.delete(&keys.members),
            self.store.delete(&keys.log),
        )
        .map_err(RoomError::store("delete", room_id))?;
        tracing::info!(%room_id, "room deleted");
        Ok(())
    }

    /// Adds `login_id` to the membership set. Returns `true` if it was
    /// not already a member.
    pub async fn add_member(&self, room_id: &RoomId, login_id: &LoginId) -> Result<bool, RoomError> {
        let key = RoomKeys::new(room_id).members;
        let added = self
            .store
            .set_add(&key, login_id.as_str())
            .await
            .map_err(RoomError::store("add member", room_id))?;
        // A set created by this add has no TTL yet.
        self.store
            .expire(&key, self.config.ttl)
            .await
            .map_err(RoomError::store("add member", room_id))?;
        Ok(added)
    }

    /// Removes `login_id` from the membership set and returns how many
    /// members remain.
    pub async fn remove_member(
        &self,
        room_id: &RoomId,
        login_id: &LoginId,
    ) -> Result<usize, RoomError> {
        let key = RoomKeys::new(room_id).members;
        self.store
            .set_remove(&key, login_id.as_str())
            .await
            .map_err(RoomError::store("remove member", room_id))?;
        Ok(self.members(room_id).await?.len())
    }

    /// Lists the room's members.
    pub async fn members(&self, room_id: &RoomId) -> Result<Vec<LoginId>, RoomError> {
        let members = self
            .store
            .set_members(&RoomKeys::new(room_id).members)
            .await
            .map_err(RoomError::store("list members", room_id))?;
        Ok(members.into_iter().map(LoginId::from).collect())
    }

    pub async fn is_member(&self, room_id: &RoomId, login_id: &LoginId) -> Result<bool, RoomError> {
        let members = self
            .store
            .set_members(&RoomKeys::new(room_id).members)
            .await
            .map_err(RoomError::store("check membership", room_id))?;
        Ok(members.iter().any(|m| m == login_id.as_str()))
    }
}
