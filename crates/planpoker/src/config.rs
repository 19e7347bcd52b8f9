//! Server configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use planpoker_room::RoomConfig;
use planpoker_session::SessionConfig;
use planpoker_transport::DEFAULT_HANDSHAKE_TIMEOUT;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:50051";
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const DEV_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A malformed configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Everything the `planpoker-server` binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Shared store URL. `None` runs on the in-memory store.
    pub redis_url: Option<String>,
    /// How long shutdown waits for open connections to finish.
    pub shutdown_grace: Duration,
    /// How long a client may take to complete the WebSocket upgrade.
    pub handshake_timeout: Duration,
    pub session: SessionConfig,
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            redis_url: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            session: SessionConfig::default(),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `PLANPOKER_*` variables from the process environment,
    /// falling back to defaults for anything unset.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `PLANPOKER_BIND_ADDR` | listen address (`127.0.0.1:50051`) |
    /// | `PLANPOKER_REDIS_URL` | shared store URL (unset: in-memory) |
    /// | `PLANPOKER_DEV` | `true` shortens the shutdown grace to 1 s |
    /// | `PLANPOKER_SHUTDOWN_GRACE_SECS` | shutdown grace (5) |
    /// | `PLANPOKER_HANDSHAKE_TIMEOUT_MS` | WebSocket upgrade deadline (10000) |
    /// | `PLANPOKER_SESSION_TTL_SECS` | session TTL (3600) |
    /// | `PLANPOKER_ROOM_TTL_SECS` | room TTL (900) |
    /// | `PLANPOKER_LISTEN_BLOCK_MS` | listener long-poll (3000) |
    /// | `PLANPOKER_GUARD_PUBLISH` | reject lost updates (`false`) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("PLANPOKER_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.redis_url = lookup("PLANPOKER_REDIS_URL").filter(|url| !url.is_empty());

        if parse::<bool>(&lookup, "PLANPOKER_DEV", "bool")?.unwrap_or(false) {
            config.shutdown_grace = DEV_SHUTDOWN_GRACE;
        }
        if let Some(secs) = parse::<u64>(&lookup, "PLANPOKER_SHUTDOWN_GRACE_SECS", "number of seconds")? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&lookup, "PLANPOKER_HANDSHAKE_TIMEOUT_MS", "number of milliseconds")? {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "PLANPOKER_SESSION_TTL_SECS", "number of seconds")? {
            config.session.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "PLANPOKER_ROOM_TTL_SECS", "number of seconds")? {
            config.room.ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&lookup, "PLANPOKER_LISTEN_BLOCK_MS", "number of milliseconds")? {
            config.room.listen_block = Duration::from_millis(ms);
        }
        if let Some(guard) = parse::<bool>(&lookup, "PLANPOKER_GUARD_PUBLISH", "bool")? {
            config.room.guard_publish = guard;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                value,
                expected,
            })
        })
        .transpose()
}
