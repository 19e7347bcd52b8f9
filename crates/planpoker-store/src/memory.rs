//! In-memory [`StateStore`] adapter.
//!
//! Keeps every key in one `HashMap` behind a Tokio mutex. Expiry is lazy:
//! an expired key is dropped the next time anything touches it, and a
//! periodic sweep drops expired keys nobody touches again. Deadlines use
//! Tokio's clock, so tests can drive TTLs with `tokio::time::advance`.
//!
//! Blocking log reads park on a [`Notify`] shared by the readers of one
//! key. Only an append to that key wakes them.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{EntryId, LogEntry, StateStore, StoreError};

/// A process-local [`StateStore`].
///
/// Suitable for tests and for running a single server node. State is lost
/// when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

/// How often expired keys are swept out even if nothing reads them.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    /// Wake-ups for blocked log readers, per log key.
    waiters: HashMap<String, Weak<Notify>>,
    /// Last id handed out by `append_log`, across all logs.
    last_id: EntryId,
    next_sweep: Option<Instant>,
}

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Str(String),
    Set(BTreeSet<String>),
    Log(VecDeque<LogEntry>),
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl Inner {
    /// Returns the slot for `key` unless it is missing or expired.
    fn live(&mut self, key: &str) -> Option<&mut Slot> {
        let now = Instant::now();
        self.sweep(now);
        if self.slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            self.slots.remove(key);
        }
        self.slots.get_mut(key)
    }

    /// Drops every expired key and every waiter entry with no readers
    /// left, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.next_sweep = Some(now + SWEEP_INTERVAL);

        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        self.waiters.retain(|_, waiter| waiter.strong_count() > 0);
        let swept = before - self.slots.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = self.slots.len(), "swept expired keys");
        }
    }

    /// Returns the wake-up shared by readers blocked on `key`.
    fn waiter(&mut self, key: &str) -> Arc<Notify> {
        if let Some(notify) = self.waiters.get(key).and_then(Weak::upgrade) {
            return notify;
        }
        let notify = Arc::new(Notify::new());
        self.waiters.insert(key.to_string(), Arc::downgrade(&notify));
        notify
    }

    fn forget_waiter(&mut self, key: &str) {
        if self.waiters.get(key).is_some_and(|w| w.strong_count() == 0) {
            self.waiters.remove(key);
        }
    }

    fn next_id(&mut self) -> EntryId {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_id = self.last_id.next_after(now_millis);
        self.last_id
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn newest_after(
        &self,
        key: &str,
        cursor: EntryId,
    ) -> Result<Option<LogEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Log(log),
                ..
            }) => Ok(log.back().filter(|e| e.id > cursor).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn wait_for_entry(
        &self,
        key: &str,
        cursor: EntryId,
        deadline: Instant,
        notify: &Notify,
    ) -> Result<Option<LogEntry>, StoreError> {
        loop {
            // Register interest before checking, so an append that lands
            // between the check and the wait still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.newest_after(key, cursor).await? {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

impl StateStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.sweep(Instant::now());
        inner
            .slots
            .insert(key.to_string(), Slot::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.live(key).is_some() {
            return Ok(false);
        }
        inner.slots.insert(
            key.to_string(),
            Slot::new(Value::Str(value.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let existed = inner.live(key).is_some();
        inner.slots.remove(key);
        Ok(existed)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => {
                let members = BTreeSet::from([member.to_string()]);
                inner
                    .slots
                    .insert(key.to_string(), Slot::new(Value::Set(members), None));
                Ok(true)
            }
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.insert(member.to_string())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let (removed, now_empty) = match inner.live(key) {
            None => return Ok(false),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => (members.remove(member), members.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            inner.slots.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(Vec::new()),
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(false),
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn append_log(
        &self,
        key: &str,
        max_len: usize,
        fields: BTreeMap<String, Vec<u8>>,
    ) -> Result<EntryId, StoreError> {
        let max_len = max_len.max(1);
        let (id, waiter) = {
            let mut inner = self.inner.lock().await;
            let id = inner.next_id();
            let entry = LogEntry { id, fields };
            match inner.live(key) {
                None => {
                    let log = VecDeque::from([entry]);
                    inner
                        .slots
                        .insert(key.to_string(), Slot::new(Value::Log(log), None));
                }
                Some(Slot {
                    value: Value::Log(log),
                    ..
                }) => {
                    log.push_back(entry);
                    while log.len() > max_len {
                        log.pop_front();
                    }
                }
                Some(_) => return Err(wrong_type(key)),
            }
            (id, inner.waiters.get(key).and_then(Weak::upgrade))
        };
        if let Some(waiter) = waiter {
            waiter.notify_waiters();
        }
        Ok(id)
    }

    async fn read_log_latest(&self, key: &str) -> Result<Option<LogEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Log(log),
                ..
            }) => Ok(log.back().cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn read_log_after(
        &self,
        key: &str,
        cursor: EntryId,
        block: Duration,
    ) -> Result<Option<LogEntry>, StoreError> {
        let deadline = Instant::now() + block;
        let notify = self.inner.lock().await.waiter(key);
        let result = self.wait_for_entry(key, cursor, deadline, &notify).await;

        drop(notify);
        self.inner.lock().await.forget_waiter(key);
        result
    }
}
