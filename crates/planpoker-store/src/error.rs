//! Error types for the store layer.

/// Errors a [`StateStore`](crate::StateStore) adapter can report.
///
/// Absence is never an error here: a missing key is `None`, `false`, or
/// an empty collection. These variants are for the store itself failing.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key holds a value of a different kind (e.g. a set where a
    /// log was expected).
    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),

    /// The backend returned something the adapter could not interpret.
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// The backend failed (connection lost, timeout, refused command).
    #[error("store backend failed: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}
