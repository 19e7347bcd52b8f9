//! Redis [`StateStore`] adapter.
//!
//! Strings, sets, and TTLs map one-to-one onto Redis commands. Logs are
//! Redis streams: `XADD ... MAXLEN` appends and trims in one step, and
//! stream ids (`{millis}-{seq}`) are exactly [`EntryId`]s.
//!
//! Ordinary commands share one auto-reconnecting [`ConnectionManager`].
//! A blocking `XREAD` would hold that multiplexed connection hostage for
//! up to the block interval, so blocking reads run on dedicated
//! connections. Those are kept in a small idle pool and reused, so a
//! steady stream of long-polls does not dial Redis every few seconds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use redis::{Client, Value};

use tokio::sync::Mutex;

use crate::{EntryId, LogEntry, StateStore, StoreError};

/// Idle blocking-read connections kept for reuse.
const MAX_IDLE_BLOCKING: usize = 32;

/// A [`StateStore`] backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
    blocking: Arc<IdlePool<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        tracing::info!(url, "connected to redis");
        Ok(Self {
            client,
            manager,
            blocking: Arc::new(IdlePool::new(MAX_IDLE_BLOCKING)),
        })
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.blocking.take().await {
            return Ok(conn);
        }
        tracing::debug!("opening blocking redis connection");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

/// A bounded stack of idle connections.
///
/// A connection goes back only after its command completed. One dropped
/// mid-command may still have a reply in flight and is discarded.
struct IdlePool<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
}

impl<C> IdlePool<C> {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    async fn take(&self) -> Option<C> {
        self.idle.lock().await.pop()
    }

    /// Returns `conn` to the pool. Returns `false` and drops it if the
    /// pool is full.
    async fn put(&self, conn: C) -> bool {
        let mut idle = self.idle.lock().await;
        if idle.len() >= self.max_idle {
            return false;
        }
        idle.push(conn);
        true
    }
}

fn millis(d: Duration) -> u64 {
    // PX / PEXPIRE reject 0; round anything shorter up to 1ms.
    (d.as_millis() as u64).max(1)
}

fn parse_id(raw: &str) -> Result<EntryId, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::UnexpectedReply(format!("stream id {raw:?}")))
}

fn to_entry(stream_id: &StreamId) -> Result<LogEntry, StoreError> {
    let mut fields = BTreeMap::new();
    for (name, value) in &stream_id.map {
        let bytes: Vec<u8> = redis::from_redis_value(value)?;
        fields.insert(name.clone(), bytes);
    }
    Ok(LogEntry {
        id: parse_id(&stream_id.id)?,
        fields,
    })
}

impl StateStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: Value = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn append_log(
        &self,
        key: &str,
        max_len: usize,
        fields: BTreeMap<String, Vec<u8>>,
    ) -> Result<EntryId, StoreError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg(max_len.max(1)).arg("*");
        for (name, value) in &fields {
            cmd.arg(name).arg(value.as_slice());
        }
        let id: String = cmd.query_async(&mut conn).await?;
        parse_id(&id)
    }

    async fn read_log_latest(&self, key: &str) -> Result<Option<LogEntry>, StoreError> {
        let mut conn = self.manager.clone();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;
        reply.ids.first().map(to_entry).transpose()
    }

    async fn read_log_after(
        &self,
        key: &str,
        cursor: EntryId,
        block: Duration,
    ) -> Result<Option<LogEntry>, StoreError> {
        let mut conn = self.blocking_connection().await?;
        let mut cmd = redis::cmd("XREAD");
        // BLOCK 0 would wait forever; a zero interval means "don't block".
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(millis(block));
        }
        cmd.arg("STREAMS").arg(key).arg(cursor.to_string());

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;
        self.blocking.put(conn).await;
        let newest = reply
            .as_ref()
            .and_then(|r| r.keys.first())
            .and_then(|k| k.ids.last());
        newest.map(to_entry).transpose()
    }
}
