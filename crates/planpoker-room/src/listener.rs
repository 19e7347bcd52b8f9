//! Per-viewer snapshot listener.
//!
//! A listener is a cursor over one room's snapshot log. Each
//! [`listen`](RoomListener::listen) call is one pull:
//!
//! ```text
//! member? ──no──→ Err(Left)            stop
//!    │
//!   yes
//!    │
//! cursor? ──none──→ read latest        (missing log → Transient)
//!    │
//!   some
//!    │
//! read after cursor, block ≤ listen_block   (timeout → Transient)
//!    │
//! advance cursor, Ok(snapshot)
//! ```
//!
//! [`into_stream`](RoomListener::into_stream) turns the pulls into a
//! `Stream` that retries transient results, ends quietly on `Left` or
//! cancellation, and yields anything else as a final error.

use std::time::Duration;

use futures_util::Stream;
use futures_util::stream;
use planpoker_protocol::{EntryId, LoginId, RoomId, Snapshot};
use planpoker_store::StateStore;
use tokio_util::sync::CancellationToken;

use crate::{RoomError, RoomLifecycle, SnapshotLog};

/// One viewer's position in a room's snapshot log.
pub struct RoomListener<S: StateStore> {
    room_id: RoomId,
    login_id: LoginId,
    cursor: Option<EntryId>,
    lifecycle: RoomLifecycle<S>,
    log: SnapshotLog<S>,
    retry_backoff: Duration,
}

impl<S: StateStore> RoomListener<S> {
    /// Creates a listener with no cursor: its first pull returns the
    /// room's current snapshot.
    pub fn new(
        room_id: RoomId,
        login_id: LoginId,
        lifecycle: RoomLifecycle<S>,
        log: SnapshotLog<S>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            room_id,
            login_id,
            cursor: None,
            lifecycle,
            log,
            retry_backoff,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn login_id(&self) -> &LoginId {
        &self.login_id
    }

    /// The id of the last snapshot this listener returned.
    pub fn cursor(&self) -> Option<EntryId> {
        self.cursor
    }

    /// Pulls the next snapshot.
    ///
    /// # Errors
    /// - [`RoomError::Left`] once the viewer is no longer a member. Stop
    ///   pulling.
    /// - [`RoomError::Transient`] if nothing new arrived in time. Pull
    ///   again after a short pause.
    /// - anything else is a real failure.
    pub async fn listen(&mut self) -> Result<Snapshot, RoomError> {
        if !self
            .lifecycle
            .is_member(&self.room_id, &self.login_id)
            .await?
        {
            return Err(RoomError::Left {
                room_id: self.room_id.clone(),
                login_id: self.login_id.clone(),
            });
        }

        let (id, snapshot) = match self.cursor {
            None => self
                .log
                .read_latest(&self.room_id)
                .await
                .map_err(|e| match e {
                    RoomError::NotFound(room_id) => RoomError::Transient(room_id),
                    other => other,
                })?,
            Some(cursor) => self.log.read_after(&self.room_id, cursor).await?,
        };
        self.cursor = Some(id);
        Ok(snapshot)
    }

    /// Turns the listener into a stream of `(entry id, snapshot)` pairs.
    ///
    /// - `Transient` pulls are retried after `retry_backoff`.
    /// - `Left`, or `cancel` firing (even mid-pull or mid-backoff), ends
    ///   the stream without an error.
    /// - Any other error is yielded once, then the stream ends.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<(EntryId, Snapshot), RoomError>> + Send + 'static {
        stream::unfold(Some(self), move |state| {
            let cancel = cancel.clone();
            async move {
                let mut listener = state?;
                loop {
                    let pulled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!(room_id = %listener.room_id, login_id = %listener.login_id, "listener cancelled");
                            return None;
                        }
                        pulled = listener.listen() => pulled,
                    };

                    match pulled {
                        Ok(snapshot) => {
                            let id = listener.cursor.unwrap_or(EntryId::ZERO);
                            return Some((Ok((id, snapshot)), Some(listener)));
                        }
                        Err(e) if e.is_transient() => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => return None,
                                _ = tokio::time::sleep(listener.retry_backoff) => {}
                            }
                        }
                        Err(e) if e.is_terminal() => {
                            tracing::debug!(room_id = %listener.room_id, login_id = %listener.login_id, "listener left room");
                            return None;
                        }
                        Err(e) => return Some((Err(e), None)),
                    }
                }
            }
        })
    }
}
