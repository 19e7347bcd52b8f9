//! `PlanpokerServer` builder and server loop.
//!
//! Ties the layers together: transport → protocol → session/room → store.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use planpoker_protocol::JsonCodec;
use planpoker_room::{RoomConfig, RoomManager};
use planpoker_session::{SessionConfig, SessionManager};
use planpoker_store::StateStore;
use planpoker_transport::{Connection, Transport, WebSocketTransport};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::handler::handle_connection;
use crate::{PlanpokerError, ServerConfig};

/// Shared server state passed to each connection handler task.
///
/// Holds no room or session data of its own; everything goes through
/// the store, so the managers need no locking here.
pub(crate) struct ServerState<S: StateStore> {
    pub(crate) sessions: SessionManager<S>,
    pub(crate) rooms: RoomManager<S>,
    pub(crate) store: Arc<S>,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a planpoker server.
///
/// # Example
///
/// ```rust,ignore
/// let server = PlanpokerServerBuilder::new()
///     .bind("0.0.0.0:50051")
///     .build(Arc::new(MemoryStore::new()))
///     .await?;
/// server.run().await
/// ```
pub struct PlanpokerServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    room_config: RoomConfig,
    shutdown_grace: Duration,
    handshake_timeout: Duration,
}

impl PlanpokerServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig::default())
    }

    /// Starts from a full [`ServerConfig`]. `redis_url` is ignored here;
    /// the caller picks the store.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            session_config: config.session.clone(),
            room_config: config.room.clone(),
            shutdown_grace: config.shutdown_grace,
            handshake_timeout: config.handshake_timeout,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.room_config = config;
        self
    }

    /// How long shutdown waits for open connections before aborting them.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// How long a client may take to complete the WebSocket upgrade.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Binds the WebSocket listener and wires the managers to `store`.
    pub async fn build<S: StateStore>(
        self,
        store: Arc<S>,
    ) -> Result<PlanpokerServer<S>, PlanpokerError> {
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_handshake_timeout(self.handshake_timeout);

        let state = Arc::new(ServerState {
            sessions: SessionManager::new(Arc::clone(&store), self.session_config),
            rooms: RoomManager::new(Arc::clone(&store), self.room_config),
            store,
            codec: JsonCodec,
        });

        Ok(PlanpokerServer {
            transport,
            state,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

impl Default for PlanpokerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound planpoker server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct PlanpokerServer<S: StateStore> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S>>,
    shutdown_grace: Duration,
}

impl<S: StateStore> PlanpokerServer<S> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, PlanpokerError> {
        Ok(self.transport.local_addr()?)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), PlanpokerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// On shutdown every open connection is told to stop: its snapshot
    /// streams end with `Cancelled` and the socket is closed. Connections
    /// still running after the grace period are aborted.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), PlanpokerError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(addr = %self.local_addr()?, "planpoker server running");

        let cancel = CancellationToken::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        let cancel = cancel.child_token();
                        connections.spawn(async move {
                            let conn_id = conn.id();
                            if let Err(e) = handle_connection(conn, state, cancel).await {
                                tracing::debug!(%conn_id, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        tracing::info!(
            open = connections.len(),
            grace = ?self.shutdown_grace,
            "shutting down"
        );
        cancel.cancel();

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = connections.len(), "grace period elapsed, aborting connections");
            connections.shutdown().await;
        }

        tracing::info!("planpoker server stopped");
        Ok(())
    }
}
