//! The per-room snapshot log.
//!
//! Each room has a log capped at one entry. Publishing appends a full
//! [`Snapshot`] and evicts the previous one, so the log behaves as a
//! "latest value" cell whose entry id grows on every write. Listeners use
//! that id as their cursor.

use std::collections::BTreeMap;
use std::sync::Arc;

use planpoker_protocol::{Codec, EntryId, JsonCodec, ProtocolError, RoomId, Snapshot};
use planpoker_store::{LogEntry, StateStore};

use crate::{RoomConfig, RoomError, RoomKeys};

/// Entries kept per room log.
const LOG_DEPTH: usize = 1;

/// Name of the log entry field holding the encoded snapshot.
const SNAPSHOT_FIELD: &str = "snapshot";

/// Publishes and reads room snapshots.
pub struct SnapshotLog<S: StateStore> {
    store: Arc<S>,
    config: RoomConfig,
    codec: JsonCodec,
}

impl<S: StateStore> Clone for SnapshotLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            codec: self.codec,
        }
    }
}

impl<S: StateStore> SnapshotLog<S> {
    pub fn new(store: Arc<S>, config: RoomConfig) -> Self {
        Self {
            store,
            config,
            codec: JsonCodec,
        }
    }

    /// Appends `snapshot` as the only entry of its room's log and returns
    /// the new entry id.
    ///
    /// Publishing to a room with no log creates it. The log's TTL is
    /// reset afterwards so a freshly created log expires with the rest of
    /// the room.
    pub async fn publish(&self, snapshot: &Snapshot) -> Result<EntryId, RoomError> {
        let room_id = &snapshot.room_id;
        let key = RoomKeys::new(room_id).log;

        let bytes = self
            .codec
            .encode(snapshot)
            .map_err(RoomError::protocol(room_id))?;
        let fields = BTreeMap::from([(SNAPSHOT_FIELD.to_string(), bytes)]);

        let id = self
            .store
            .append_log(&key, LOG_DEPTH, fields)
            .await
            .map_err(RoomError::store("publish", room_id))?;
        self.store
            .expire(&key, self.config.ttl)
            .await
            .map_err(RoomError::store("publish", room_id))?;

        tracing::debug!(%room_id, entry_id = %id, state = %snapshot.state, "snapshot published");
        Ok(id)
    }

    /// Reads the current snapshot.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the room has no log (expired, deleted,
    /// or never created).
    pub async fn read_latest(&self, room_id: &RoomId) -> Result<(EntryId, Snapshot), RoomError> {
        let entry = self
            .store
            .read_log_latest(&RoomKeys::new(room_id).log)
            .await
            .map_err(RoomError::store("read snapshot", room_id))?
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;
        self.decode(room_id, &entry)
    }

    /// Returns the id of the current entry without decoding it, or
    /// `None` if the room has no log.
    pub async fn latest_id(&self, room_id: &RoomId) -> Result<Option<EntryId>, RoomError> {
        let entry = self
            .store
            .read_log_latest(&RoomKeys::new(room_id).log)
            .await
            .map_err(RoomError::store("read snapshot id", room_id))?;
        Ok(entry.map(|e| e.id))
    }

    /// Waits up to `listen_block` for a snapshot newer than `cursor`.
    ///
    /// # Errors
    /// [`RoomError::Transient`] if nothing newer arrived in time. That
    /// says nothing about whether the room still exists.
    pub async fn read_after(
        &self,
        room_id: &RoomId,
        cursor: EntryId,
    ) -> Result<(EntryId, Snapshot), RoomError> {
        let entry = self
            .store
            .read_log_after(
                &RoomKeys::new(room_id).log,
                cursor,
                self.config.listen_block,
            )
            .await
            .map_err(RoomError::store("wait for snapshot", room_id))?
            .ok_or_else(|| RoomError::Transient(room_id.clone()))?;
        self.decode(room_id, &entry)
    }

    fn decode(&self, room_id: &RoomId, entry: &LogEntry) -> Result<(EntryId, Snapshot), RoomError> {
        let bytes = entry.field(SNAPSHOT_FIELD).ok_or_else(|| RoomError::Protocol {
            room_id: room_id.clone(),
            source: ProtocolError::InvalidMessage(format!(
                "log entry {} has no {SNAPSHOT_FIELD} field",
                entry.id
            )),
        })?;
        let snapshot = self
            .codec
            .decode(bytes)
            .map_err(RoomError::protocol(room_id))?;
        Ok((entry.id, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use planpoker_protocol::{LoginId, RoomState};
    use planpoker_store::MemoryStore;

    use super::*;

    fn setup() -> (Arc<MemoryStore>, SnapshotLog<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let log = SnapshotLog::new(Arc::clone(&store), RoomConfig::default());
        (store, log)
    }

    fn snapshot(id: &str) -> Snapshot {
        Snapshot::new(id.parse().unwrap(), LoginId::from("m"))
    }

    #[tokio::test]
    async fn test_read_latest_missing_room_not_found() {
        let (_, log) = setup();
        let err = log.read_latest(&"11111".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RoomError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_then_read_latest_returns_it() {
        let (_, log) = setup();
        let snap = snapshot("11111");

        let id = log.publish(&snap).await.unwrap();
        let (read_id, read) = log.read_latest(&snap.room_id).await.unwrap();

        assert_eq!(read_id, id);
        assert_eq!(read, snap);
    }

    #[tokio::test]
    async fn test_publish_keeps_only_latest_with_growing_ids() {
        let (_, log) = setup();
        let mut snap = snapshot("11111");
        let first = log.publish(&snap).await.unwrap();
        snap.state = RoomState::Open;
        let second = log.publish(&snap).await.unwrap();

        assert!(second > first);
        let (id, read) = log.read_latest(&snap.room_id).await.unwrap();
        assert_eq!(id, second);
        assert_eq!(read.state, RoomState::Open);
        assert_eq!(log.latest_id(&snap.room_id).await.unwrap(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_times_out_transient() {
        let (_, log) = setup();
        let snap = snapshot("11111");
        let id = log.publish(&snap).await.unwrap();

        let err = log.read_after(&snap.room_id, id).await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_wakes_on_publish() {
        let (_, log) = setup();
        let mut snap = snapshot("11111");
        let id = log.publish(&snap).await.unwrap();

        let reader = {
            let log = log.clone();
            let room_id = snap.room_id.clone();
            tokio::spawn(async move { log.read_after(&room_id, id).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        snap.state = RoomState::Open;
        let newer = log.publish(&snap).await.unwrap();

        let (read_id, read) = reader.await.unwrap().unwrap();
        assert_eq!(read_id, newer);
        assert_eq!(read.state, RoomState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_sets_log_ttl() {
        let (_, log) = setup();
        let snap = snapshot("11111");
        log.publish(&snap).await.unwrap();

        tokio::time::advance(Duration::from_secs(15 * 60)).await;

        assert_eq!(log.latest_id(&snap.room_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_latest_entry_without_snapshot_field_is_protocol_error() {
        let (store, log) = setup();
        let room_id: RoomId = "11111".parse().unwrap();
        let fields = BTreeMap::from([("other".to_string(), b"x".to_vec())]);
        store
            .append_log(&RoomKeys::new(&room_id).log, 1, fields)
            .await
            .unwrap();

        let err = log.read_latest(&room_id).await.unwrap_err();
        assert!(matches!(err, RoomError::Protocol { .. }));
    }
}
