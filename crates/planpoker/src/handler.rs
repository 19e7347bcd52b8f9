//! Per-connection handler: request dispatch and snapshot streams.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. Requests are answered in order on that task,
//! except `EnterRoom`, which spawns a stream task that keeps pushing
//! snapshots under the request's id until the viewer leaves, the client
//! sends `Cancel`, or the connection goes away.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use planpoker_protocol::{
    Codec, EndReason, Envelope, JsonCodec, LoginId, Request, Response, RoomId,
};
use planpoker_room::RoomListener;
use planpoker_store::StateStore;
use planpoker_transport::{Connection, WebSocketConnection};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::PlanpokerError;
use crate::server::ServerState;

/// A running `EnterRoom` stream, keyed by its request id.
///
/// `generation` tells a finished task apart from a newer stream that
/// reused the same request id.
struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S: StateStore>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S>>,
    shutdown: CancellationToken,
) -> Result<(), PlanpokerError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let streams_cancel = shutdown.child_token();
    let mut streams: HashMap<u64, StreamHandle> = HashMap::new();
    let mut tasks: JoinSet<(u64, u64)> = JoinSet::new();
    let mut generation: u64 = 0;

    let result = loop {
        let data = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!(%conn_id, "connection stopped by shutdown");
                break Ok(());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Ok((id, finished)) = joined {
                    if streams.get(&id).is_some_and(|s| s.generation == finished) {
                        streams.remove(&id);
                    }
                }
                continue;
            }
            received = conn.recv() => match received {
                Ok(Some(data)) => data,
                Ok(None) => {
                    tracing::debug!(%conn_id, "connection closed cleanly");
                    break Ok(());
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    break Ok(());
                }
            },
        };

        let Envelope { id, body } = match state.codec.decode::<Envelope<Request>>(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                if let Err(e) = send(&conn, &state.codec, 0, error_body(&e.into())).await {
                    break Err(e);
                }
                continue;
            }
        };

        let reply = match body {
            Request::EnterRoom { room_id, login_id } => {
                match enter(&state, &room_id, &login_id).await {
                    Ok(listener) => {
                        generation += 1;
                        let cancel = streams_cancel.child_token();
                        let previous = streams.insert(
                            id,
                            StreamHandle {
                                generation,
                                cancel: cancel.clone(),
                            },
                        );
                        if let Some(previous) = previous {
                            previous.cancel.cancel();
                        }

                        let conn = Arc::clone(&conn);
                        let codec = state.codec;
                        let current = generation;
                        tasks.spawn(async move {
                            stream_snapshots(conn, codec, listener, id, cancel).await;
                            (id, current)
                        });
                        None
                    }
                    Err(e) => Some(error_body(&e)),
                }
            }
            Request::Cancel { stream } => {
                if let Some(handle) = streams.remove(&stream) {
                    handle.cancel.cancel();
                }
                Some(Response::Ok)
            }
            other => Some(dispatch(&state, other).await.unwrap_or_else(|e| error_body(&e))),
        };

        if let Some(reply) = reply {
            if let Err(e) = send(&conn, &state.codec, id, reply).await {
                break Err(e);
            }
        }
    };

    streams_cancel.cancel();
    while tasks.join_next().await.is_some() {}
    let _ = conn.close().await;
    tracing::debug!(%conn_id, "connection finished");

    result
}

/// Handles every request that produces exactly one response.
async fn dispatch<S: StateStore>(
    state: &ServerState<S>,
    request: Request,
) -> Result<Response, PlanpokerError> {
    match request {
        Request::Login {
            login_id,
            session_id,
        } => {
            require_login_id(&login_id)?;
            let session = state
                .sessions
                .login(&login_id, session_id.as_deref())
                .await?;
            Ok(Response::LoggedIn { session })
        }
        Request::Logout { login_id } => {
            require_login_id(&login_id)?;
            state.sessions.logout(&login_id).await?;
            Ok(Response::Ok)
        }
        Request::CreateRoom { login_id } => {
            require_login_id(&login_id)?;
            let room_id = state.rooms.create(&login_id).await?;
            Ok(Response::RoomCreated { room_id })
        }
        Request::CanEnterRoom { room_id } => {
            let can_enter = state.rooms.can_enter(&room_id).await?;
            Ok(Response::CanEnterRoom { can_enter })
        }
        Request::LeaveRoom { room_id, login_id } => {
            state.rooms.leave(&room_id, &login_id).await?;
            Ok(Response::Ok)
        }
        Request::Voting {
            room_id,
            login_id,
            point,
        } => {
            state.rooms.voting(&room_id, &login_id, point).await?;
            Ok(Response::Ok)
        }
        Request::VoteCounting { room_id, login_id } => {
            state.rooms.vote_counting(&room_id, &login_id).await?;
            Ok(Response::Ok)
        }
        Request::ResetRoom { room_id } => {
            state.rooms.reset(&room_id).await?;
            Ok(Response::Ok)
        }
        Request::Health => {
            let serving = match state.store.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "health check failed");
                    false
                }
            };
            Ok(Response::Health { serving })
        }
        Request::EnterRoom { .. } | Request::Cancel { .. } => Err(PlanpokerError::BadRequest(
            "streaming request routed as unary".into(),
        )),
    }
}

async fn enter<S: StateStore>(
    state: &ServerState<S>,
    room_id: &RoomId,
    login_id: &LoginId,
) -> Result<RoomListener<S>, PlanpokerError> {
    require_login_id(login_id)?;
    Ok(state.rooms.enter(room_id, login_id).await?)
}

/// Pushes one `Snapshot` frame per stream item.
///
/// Ends with `StreamEnded` when the viewer leaves or the stream is
/// cancelled, or with a single `Error` frame if the listener fails.
async fn stream_snapshots<S: StateStore>(
    conn: Arc<WebSocketConnection>,
    codec: JsonCodec,
    listener: RoomListener<S>,
    id: u64,
    cancel: CancellationToken,
) {
    let room_id = listener.room_id().clone();
    let login_id = listener.login_id().clone();
    tracing::debug!(%room_id, %login_id, stream = id, "snapshot stream started");

    let mut snapshots = std::pin::pin!(listener.into_stream(cancel.clone()));
    while let Some(item) = snapshots.next().await {
        let body = match item {
            Ok((entry_id, snapshot)) => Response::Snapshot { entry_id, snapshot },
            Err(e) => {
                let e = PlanpokerError::from(e);
                tracing::warn!(%room_id, %login_id, error = %e, "snapshot stream failed");
                let _ = send(&conn, &codec, id, error_body(&e)).await;
                return;
            }
        };
        if let Err(e) = send(&conn, &codec, id, body).await {
            tracing::debug!(%room_id, %login_id, error = %e, "snapshot push failed");
            return;
        }
    }

    let reason = if cancel.is_cancelled() {
        EndReason::Cancelled
    } else {
        EndReason::Left
    };
    tracing::debug!(%room_id, %login_id, stream = id, ?reason, "snapshot stream ended");
    let _ = send(&conn, &codec, id, Response::StreamEnded { reason }).await;
}

fn require_login_id(login_id: &LoginId) -> Result<(), PlanpokerError> {
    if login_id.is_empty() {
        return Err(PlanpokerError::BadRequest("login_id must not be empty".into()));
    }
    Ok(())
}

fn error_body(e: &PlanpokerError) -> Response {
    let code = e.status_code();
    if code >= 500 {
        tracing::warn!(code, error = %e, "request failed");
    } else {
        tracing::debug!(code, error = %e, "request rejected");
    }
    Response::Error {
        code,
        message: e.to_string(),
    }
}

/// Encodes and sends one response envelope.
async fn send(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    id: u64,
    body: Response,
) -> Result<(), PlanpokerError> {
    let bytes = codec.encode(&Envelope::new(id, body))?;
    conn.send(&bytes).await?;
    Ok(())
}
