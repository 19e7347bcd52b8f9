//! Integration tests for the room system against the in-memory store.
//!
//! Anything that waits on the snapshot log runs on Tokio's paused clock,
//! so a 3 s long-poll costs no wall time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use planpoker_protocol::{EntryId, LoginId, Point, RoomId, RoomState};
use planpoker_room::{RoomConfig, RoomError, RoomKeys, RoomManager, SnapshotLog, ballot};
use planpoker_store::{LogEntry, MemoryStore, StateStore, StoreError};
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

fn lid(id: &str) -> LoginId {
    LoginId::from(id)
}

fn manager() -> (Arc<MemoryStore>, RoomManager<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mgr = RoomManager::new(Arc::clone(&store), RoomConfig::default());
    (store, mgr)
}

/// Creates a room and enters each of `members` into it.
async fn room_with(mgr: &RoomManager<MemoryStore>, members: &[&str]) -> RoomId {
    let room_id = mgr.create(&lid("master")).await.unwrap();
    for m in members {
        mgr.enter(&room_id, &lid(m)).await.unwrap();
    }
    room_id
}

async fn points(mgr: &RoomManager<MemoryStore>, room_id: &RoomId) -> Vec<(String, Point)> {
    let (_, snapshot) = mgr.snapshot(room_id).await.unwrap();
    snapshot
        .ballots
        .into_iter()
        .map(|b| (b.login_id.0, b.point))
        .collect()
}

async fn state(mgr: &RoomManager<MemoryStore>, room_id: &RoomId) -> RoomState {
    mgr.snapshot(room_id).await.unwrap().1.state
}

// =========================================================================
// Create / CanEnter
// =========================================================================

#[tokio::test]
async fn test_create_room_is_enterable_and_empty() {
    let (_, mgr) = manager();
    let room_id = mgr.create(&lid("master")).await.unwrap();

    assert!(mgr.can_enter(&room_id).await.unwrap());
    let (_, snapshot) = mgr.snapshot(&room_id).await.unwrap();
    assert_eq!(snapshot.master_login_id, lid("master"));
    assert_eq!(snapshot.state, RoomState::TurnDown);
    assert!(snapshot.ballots.is_empty());
}

#[tokio::test]
async fn test_can_enter_unknown_room_is_false() {
    let (_, mgr) = manager();
    assert!(!mgr.can_enter(&"00000".parse().unwrap()).await.unwrap());
}

#[tokio::test]
async fn test_sequential_creates_never_collide() {
    let (_, mgr) = manager();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..100 {
        assert!(ids.insert(mgr.create(&lid("m")).await.unwrap()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_room_expires() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;

    tokio::time::advance(Duration::from_secs(15 * 60)).await;

    assert!(!mgr.can_enter(&room_id).await.unwrap());
    let err = mgr.enter(&room_id, &lid("b")).await.err().unwrap();
    assert!(matches!(err, RoomError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_activity_keeps_room_alive() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        mgr.voting(&room_id, &lid("a"), Point::Unknown).await.unwrap();
    }

    assert!(mgr.can_enter(&room_id).await.unwrap());
}

// =========================================================================
// Enter / Leave
// =========================================================================

#[tokio::test]
async fn test_enter_twice_yields_one_ballot() {
    let (store, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "a"]).await;

    assert_eq!(points(&mgr, &room_id).await, [("a".to_string(), Point::Unknown)]);
    let members = store
        .set_members(&RoomKeys::new(&room_id).members)
        .await
        .unwrap();
    assert_eq!(members, ["a"]);
}

#[tokio::test]
async fn test_enter_unknown_room_not_found() {
    let (_, mgr) = manager();
    let err = mgr
        .enter(&"13579".parse().unwrap(), &lid("a"))
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_enter_without_snapshot_leaves_no_membership() {
    let (store, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;
    store.delete(&RoomKeys::new(&room_id).log).await.unwrap();

    let err = mgr.enter(&room_id, &lid("b")).await.err().unwrap();
    assert!(err.is_not_found());

    let members = store
        .set_members(&RoomKeys::new(&room_id).members)
        .await
        .unwrap();
    assert_eq!(members, ["a"]);
}

#[tokio::test]
async fn test_enter_again_after_failed_commit_keeps_membership() {
    let (store, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;
    store.delete(&RoomKeys::new(&room_id).log).await.unwrap();

    assert!(mgr.enter(&room_id, &lid("a")).await.is_err());

    let members = store
        .set_members(&RoomKeys::new(&room_id).members)
        .await
        .unwrap();
    assert_eq!(members, ["a"]);
}

#[tokio::test]
async fn test_leave_by_last_member_deletes_room() {
    let (store, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;

    mgr.leave(&room_id, &lid("a")).await.unwrap();

    assert!(!mgr.can_enter(&room_id).await.unwrap());
    let keys = RoomKeys::new(&room_id);
    assert!(store.get(&keys.marker).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leave_by_non_last_member_prunes_only_their_ballot() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b", "c"]).await;
    mgr.voting(&room_id, &lid("a"), Point::Two).await.unwrap();
    mgr.voting(&room_id, &lid("c"), Point::Eight).await.unwrap();

    mgr.leave(&room_id, &lid("b")).await.unwrap();

    assert!(mgr.can_enter(&room_id).await.unwrap());
    assert_eq!(
        points(&mgr, &room_id).await,
        [("a".to_string(), Point::Two), ("c".to_string(), Point::Eight)]
    );
    // Removing b's Unknown ballot does not by itself reveal the room.
    assert_eq!(state(&mgr, &room_id).await, RoomState::TurnDown);
}

// =========================================================================
// Voting / VoteCounting / Reset
// =========================================================================

#[tokio::test]
async fn test_voting_opens_room_after_last_unknown() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b"]).await;

    mgr.voting(&room_id, &lid("a"), Point::Three).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::TurnDown);

    mgr.voting(&room_id, &lid("b"), Point::Five).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::Open);
}

#[tokio::test]
async fn test_voting_while_open_fails_invalid_state() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;
    mgr.voting(&room_id, &lid("a"), Point::One).await.unwrap();

    let err = mgr
        .voting(&room_id, &lid("a"), Point::Two)
        .await
        .unwrap_err();

    assert!(matches!(err, RoomError::InvalidState { .. }));
    assert_eq!(points(&mgr, &room_id).await, [("a".to_string(), Point::One)]);
}

#[tokio::test]
async fn test_voting_without_ballot_not_found() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a"]).await;

    let err = mgr
        .voting(&room_id, &lid("ghost"), Point::One)
        .await
        .unwrap_err();

    assert!(matches!(err, RoomError::BallotNotFound { .. }));
}

#[tokio::test]
async fn test_vote_counting_forces_open_then_rejects_second_call() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b"]).await;
    mgr.voting(&room_id, &lid("a"), Point::Thirteen).await.unwrap();

    mgr.vote_counting(&room_id, &lid("a")).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::Open);
    assert_eq!(
        points(&mgr, &room_id).await,
        [("a".to_string(), Point::Thirteen), ("b".to_string(), Point::Unknown)]
    );

    let err = mgr.vote_counting(&room_id, &lid("a")).await.unwrap_err();
    assert!(matches!(
        err,
        RoomError::InvalidState {
            state: RoomState::Open,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reset_preserves_not_vote() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b", "c"]).await;
    mgr.voting(&room_id, &lid("a"), Point::NotVote).await.unwrap();
    mgr.voting(&room_id, &lid("b"), Point::Five).await.unwrap();
    mgr.voting(&room_id, &lid("c"), Point::Question).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::Open);

    mgr.reset(&room_id).await.unwrap();

    assert_eq!(state(&mgr, &room_id).await, RoomState::TurnDown);
    assert_eq!(
        points(&mgr, &room_id).await,
        [
            ("a".to_string(), Point::NotVote),
            ("b".to_string(), Point::Unknown),
            ("c".to_string(), Point::Unknown),
        ]
    );
}

#[tokio::test]
async fn test_full_round_trip() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b"]).await;

    mgr.voting(&room_id, &lid("a"), Point::Three).await.unwrap();
    mgr.voting(&room_id, &lid("b"), Point::Five).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::Open);

    mgr.reset(&room_id).await.unwrap();
    mgr.voting(&room_id, &lid("b"), Point::One).await.unwrap();
    assert_eq!(state(&mgr, &room_id).await, RoomState::TurnDown);

    mgr.leave(&room_id, &lid("a")).await.unwrap();
    assert_eq!(points(&mgr, &room_id).await, [("b".to_string(), Point::One)]);

    mgr.leave(&room_id, &lid("b")).await.unwrap();
    assert!(!mgr.can_enter(&room_id).await.unwrap());
}

// =========================================================================
// Listener
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_listener_first_pull_is_latest_then_follows_updates() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["b"]).await;
    let mut listener = mgr.enter(&room_id, &lid("a")).await.unwrap();

    let first = listener.listen().await.unwrap();
    assert_eq!(first.ballots.len(), 2);
    let cursor = listener.cursor().unwrap();

    mgr.voting(&room_id, &lid("b"), Point::Eight).await.unwrap();
    let second = listener.listen().await.unwrap();

    assert!(listener.cursor().unwrap() > cursor);
    assert_eq!(second.ballot(&lid("b")).unwrap().point, Point::Eight);
}

#[tokio::test(start_paused = true)]
async fn test_listener_without_news_is_transient() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &[]).await;
    let mut listener = mgr.enter(&room_id, &lid("a")).await.unwrap();
    listener.listen().await.unwrap();

    let err = listener.listen().await.unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_listener_after_being_removed_yields_left() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["b"]).await;
    let mut listener = mgr.enter(&room_id, &lid("a")).await.unwrap();
    listener.listen().await.unwrap();

    // Someone else (another connection) makes `a` leave.
    mgr.leave(&room_id, &lid("a")).await.unwrap();

    let err = listener.listen().await.unwrap_err();
    assert!(err.is_terminal(), "expected Left, got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_listener_of_deleted_room_yields_left() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &[]).await;
    let mut listener = mgr.enter(&room_id, &lid("a")).await.unwrap();

    mgr.leave(&room_id, &lid("a")).await.unwrap();

    assert!(matches!(
        listener.listen().await,
        Err(RoomError::Left { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stream_retries_quiet_periods_and_delivers_updates() {
    let (_, mgr) = manager();
    let mgr = Arc::new(mgr);
    let room_id = room_with(&mgr, &["b"]).await;
    let listener = mgr.enter(&room_id, &lid("a")).await.unwrap();
    let mut stream = Box::pin(listener.into_stream(CancellationToken::new()));

    let (first_id, _) = stream.next().await.unwrap().unwrap();

    let voter = {
        let mgr = Arc::clone(&mgr);
        let room_id = room_id.clone();
        tokio::spawn(async move {
            // Several long-poll timeouts pass before this lands.
            tokio::time::sleep(Duration::from_secs(10)).await;
            mgr.voting(&room_id, &lid("b"), Point::Two).await.unwrap();
        })
    };

    let (next_id, snapshot) = stream.next().await.unwrap().unwrap();
    voter.await.unwrap();

    assert!(next_id > first_id);
    assert_eq!(snapshot.ballot(&lid("b")).unwrap().point, Point::Two);
}

#[tokio::test(start_paused = true)]
async fn test_stream_ends_cleanly_on_leave() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &["b"]).await;
    let listener = mgr.enter(&room_id, &lid("a")).await.unwrap();
    let mut stream = Box::pin(listener.into_stream(CancellationToken::new()));
    stream.next().await.unwrap().unwrap();

    mgr.leave(&room_id, &lid("a")).await.unwrap();

    // The pruned snapshot may still arrive; after that the stream ends
    // without an error item.
    let rest: Vec<_> = stream.collect().await;
    assert!(rest.len() <= 1);
    assert!(rest.iter().all(Result::is_ok));
}

#[tokio::test(start_paused = true)]
async fn test_stream_ends_on_cancel_mid_wait() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &[]).await;
    let cancel = CancellationToken::new();
    let listener = mgr.enter(&room_id, &lid("a")).await.unwrap();
    let mut stream = Box::pin(listener.into_stream(cancel.clone()));
    stream.next().await.unwrap().unwrap();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        })
    };

    let started = tokio::time::Instant::now();
    assert!(stream.next().await.is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
    canceller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_many_listeners_each_see_the_update() {
    let (_, mgr) = manager();
    let room_id = room_with(&mgr, &[]).await;

    let mut streams = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let listener = mgr.enter(&room_id, &lid(name)).await.unwrap();
        let mut stream = Box::pin(listener.into_stream(CancellationToken::new()));
        stream.next().await.unwrap().unwrap();
        streams.push(stream);
    }

    mgr.vote_counting(&room_id, &lid("a")).await.unwrap();

    for stream in &mut streams {
        let (_, snapshot) = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.state, RoomState::Open);
    }
}

// =========================================================================
// Concurrent mutation
// =========================================================================

#[tokio::test]
async fn test_concurrent_mutation_is_last_write_wins() {
    let (store, mgr) = manager();
    let room_id = room_with(&mgr, &["a", "b"]).await;
    let log = SnapshotLog::new(Arc::clone(&store), RoomConfig::default());

    // Writer 1 reads and modifies its copy...
    let (_, mut stale) = log.read_latest(&room_id).await.unwrap();
    ballot::vote(&mut stale, &lid("a"), Point::Three).unwrap();

    // ...writer 2 commits in between...
    mgr.voting(&room_id, &lid("b"), Point::Five).await.unwrap();

    // ...and writer 1's publish silently drops writer 2's vote.
    log.publish(&stale).await.unwrap();

    assert_eq!(
        points(&mgr, &room_id).await,
        [("a".to_string(), Point::Three), ("b".to_string(), Point::Unknown)]
    );
}

/// Delegates to a [`MemoryStore`], but when armed, slips a competing
/// snapshot into a log right after the next `read_log_latest` of it.
struct InterleavingStore {
    inner: MemoryStore,
    armed: AtomicBool,
}

impl StateStore for InterleavingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.inner.set(key, value, ttl).await
    }
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.set_add(key, member).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.set_remove(key, member).await
    }
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.inner.set_members(key).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.expire(key, ttl).await
    }
    async fn append_log(
        &self,
        key: &str,
        max_len: usize,
        fields: BTreeMap<String, Vec<u8>>,
    ) -> Result<EntryId, StoreError> {
        self.inner.append_log(key, max_len, fields).await
    }
    async fn read_log_latest(&self, key: &str) -> Result<Option<LogEntry>, StoreError> {
        let entry = self.inner.read_log_latest(key).await?;
        if let Some(entry) = &entry {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.inner
                    .append_log(key, 1, entry.fields.clone())
                    .await?;
            }
        }
        Ok(entry)
    }
    async fn read_log_after(
        &self,
        key: &str,
        cursor: EntryId,
        block: Duration,
    ) -> Result<Option<LogEntry>, StoreError> {
        self.inner.read_log_after(key, cursor, block).await
    }
}

fn interleaving(guard_publish: bool) -> (Arc<InterleavingStore>, RoomManager<InterleavingStore>) {
    let store = Arc::new(InterleavingStore {
        inner: MemoryStore::new(),
        armed: AtomicBool::new(false),
    });
    let config = RoomConfig {
        guard_publish,
        ..RoomConfig::default()
    };
    (Arc::clone(&store), RoomManager::new(store, config))
}

#[tokio::test]
async fn test_publish_guard_rejects_interleaved_update() {
    let (store, mgr) = interleaving(true);
    let room_id = mgr.create(&lid("m")).await.unwrap();
    mgr.enter(&room_id, &lid("a")).await.unwrap();
    let (before, _) = mgr.snapshot(&room_id).await.unwrap();

    store.armed.store(true, Ordering::SeqCst);
    let err = mgr
        .voting(&room_id, &lid("a"), Point::Three)
        .await
        .unwrap_err();

    let RoomError::Conflict { read, current, .. } = err else {
        panic!("expected Conflict, got {err:?}");
    };
    assert_eq!(read, before);
    assert!(current > read);
    // The vote was not published.
    let (_, snapshot) = mgr.snapshot(&room_id).await.unwrap();
    assert_eq!(snapshot.ballot(&lid("a")).unwrap().point, Point::Unknown);
}

#[tokio::test]
async fn test_without_guard_interleaved_update_is_overwritten() {
    let (store, mgr) = interleaving(false);
    let room_id = mgr.create(&lid("m")).await.unwrap();
    mgr.enter(&room_id, &lid("a")).await.unwrap();

    store.armed.store(true, Ordering::SeqCst);
    mgr.voting(&room_id, &lid("a"), Point::Three).await.unwrap();

    let (_, snapshot) = mgr.snapshot(&room_id).await.unwrap();
    assert_eq!(snapshot.ballot(&lid("a")).unwrap().point, Point::Three);
}
