//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! WebSocket handshakes run on their own tasks with a deadline, so a
//! client that opens a TCP socket and never upgrades it cannot hold up
//! the accept loop.
//!
//! Each accepted socket is split into its sink and stream halves, each
//! behind its own lock: a task parked in `recv` holds only the stream
//! half, so snapshot pushes from other tasks go out immediately.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Default time a client gets to complete the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<TcpStream>;

type Handshake = Result<(WsStream, SocketAddr), (SocketAddr, String)>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    handshakes: JoinSet<Handshake>,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address. Port 0 picks
    /// a free port; see [`Transport::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local = listener.local_addr().map_err(TransportError::BindFailed)?;
        tracing::info!(addr = %local, "WebSocket transport listening");
        Ok(Self {
            listener,
            handshakes: JoinSet::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets how long a client may take to complete the upgrade before its
    /// socket is dropped.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn start_handshake(&mut self, stream: TcpStream, addr: SocketAddr) {
        let limit = self.handshake_timeout;
        self.handshakes.spawn(async move {
            match tokio::time::timeout(limit, tokio_tungstenite::accept_async(stream)).await {
                Ok(Ok(ws)) => Ok((ws, addr)),
                Ok(Err(e)) => Err((addr, e.to_string())),
                Err(_) => Err((addr, format!("handshake timed out after {limit:?}"))),
            }
        });
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    /// Returns the next connection whose handshake completed.
    ///
    /// Cancel-safe: sockets accepted and handshakes started by a dropped
    /// call are picked up by the next one.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (ws, addr) = loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted.map_err(TransportError::AcceptFailed)?;
                    self.start_handshake(stream, addr);
                }
                Some(joined) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    match joined {
                        Ok(Ok(done)) => break done,
                        Ok(Err((addr, reason))) => {
                            tracing::debug!(%addr, %reason, "WebSocket handshake failed");
                        }
                        Err(e) => tracing::warn!(error = %e, "handshake task failed"),
                    }
                }
            }
        };

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener.local_addr().map_err(TransportError::BindFailed)
    }
}

/// A single WebSocket connection.
///
/// Outgoing messages are sent as text frames. Incoming text and binary
/// frames are both accepted.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

fn send_failed(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
        let msg = Message::Text(text.to_owned().into());
        self.sink.lock().await.send(msg).await.map_err(send_failed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(send_failed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
