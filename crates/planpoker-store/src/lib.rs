//! The shared state store that holds every piece of durable planpoker
//! state.
//!
//! The server process itself is stateless: sessions, room markers,
//! membership sets, and snapshot logs all live behind the [`StateStore`]
//! capability. Higher layers depend only on this trait, so the same room
//! logic runs against:
//!
//! - [`MemoryStore`]: process-local, used in tests and single-node runs
//! - `RedisStore`: the production adapter (feature `redis`)
//!
//! # Primitives
//!
//! | Kind | Operations |
//! |---|---|
//! | string | `get`, `set`, `set_if_absent`, `delete`, `expire` |
//! | set | `set_add`, `set_remove`, `set_members` |
//! | log | `append_log`, `read_log_latest`, `read_log_after` |
//!
//! Each primitive is atomic on its own. Nothing here offers multi-key
//! transactions or compare-and-swap, and callers must not assume it.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

pub use planpoker_protocol::EntryId;

/// One entry of a bounded log: its id and its field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub fields: BTreeMap<String, Vec<u8>>,
}

impl LogEntry {
    /// Returns the value of one field.
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// Key-value, set, and bounded-log storage shared by every server node.
///
/// Methods return `impl Future + Send` so callers can hold the futures
/// across `.await` inside spawned Tokio tasks. Implementations can still
/// be written with plain `async fn`.
pub trait StateStore: Send + Sync + 'static {
    /// Checks that the backend is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads a string value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Writes a string value, replacing any previous value and TTL.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Writes a string value only if the key does not exist.
    ///
    /// Returns `true` if this call created the key.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes a key of any kind. Returns `true` if it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Adds a member to a set, creating the set if needed.
    ///
    /// Returns `true` if the member was not already present.
    fn set_add(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes a member from a set. Removing the last member removes
    /// the key. Returns `true` if the member was present.
    fn set_remove(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Lists the members of a set; empty if the key does not exist.
    fn set_members(&self, key: &str)
    -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Resets the TTL of a key. Returns `false` if the key does not exist.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Appends an entry to a log, trimming it to the newest `max_len`
    /// entries, and returns the new entry's id.
    ///
    /// Appending to a missing key creates the log.
    fn append_log(
        &self,
        key: &str,
        max_len: usize,
        fields: BTreeMap<String, Vec<u8>>,
    ) -> impl Future<Output = Result<EntryId, StoreError>> + Send;

    /// Returns the newest entry of a log, or `None` if the log does not
    /// exist.
    fn read_log_latest(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<LogEntry>, StoreError>> + Send;

    /// Waits up to `block` for an entry with an id greater than `cursor`
    /// and returns the newest such entry.
    ///
    /// Returns `None` when the wait elapses without one. A `None` says
    /// nothing about whether the log exists.
    fn read_log_after(
        &self,
        key: &str,
        cursor: EntryId,
        block: Duration,
    ) -> impl Future<Output = Result<Option<LogEntry>, StoreError>> + Send;
}
