//! WebSocket authority with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── Room r1 ── OperationLog
//!             ├── connection task ──►  │             PresenceTable
//! Client B ──┘   (one per socket)      │             BroadcastGroup ──► outboxes
//!                        │             └── Room r2 ── …
//!                        ▼
//!            RwLock<RoomRegistry>  (write lock held for mutation + fan-out)
//! ```
//!
//! Each connection task owns a [`ParticipantSession`] and an outbox. The
//! task reads frames, applies them to the registry under the write lock,
//! and writes whatever lands in its outbox back to the socket. Cleanup
//! runs on every exit path: close frame, transport error or server-side
//! write failure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::outbox;
use crate::protocol::{ClientMessage, ProtocolError, RegistryStats, ServerMessage};
use crate::room::RoomRegistry;
use crate::session::ParticipantSession;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Per-participant buffer for cursor and in-progress stroke relays
    pub ephemeral_capacity: usize,
    /// Heartbeat interval in seconds (0 disables pings)
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            ephemeral_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
    /// Filled in by [`SyncServer::stats`].
    pub registry: RegistryStats,
}

/// Errors that end the accept loop or a single connection.
#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    WebSocket(tokio_tungstenite::tungstenite::Error),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::WebSocket(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// The sync server.
#[derive(Clone)]
pub struct SyncServer {
    config: ServerConfig,
    /// Every live room. The single serialization point for room state.
    registry: Arc<RwLock<RoomRegistry>>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(RwLock::new(RoomRegistry::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RwLock<RoomRegistry>>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let participant_id = Uuid::new_v4();
        let (tx, mut outbox_rx) = outbox(config.ephemeral_capacity);
        let mut session = ParticipantSession::new(participant_id, tx);
        let mut heartbeat = heartbeat(config.heartbeat_interval_secs);

        log::info!("WebSocket connection established from {addr} as {participant_id}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let outcome: Result<(), ServerError> = async {
            loop {
                tokio::select! {
                    // Incoming WebSocket message
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }

                                let result = match ClientMessage::decode(text.as_str()) {
                                    Ok(client_msg) => {
                                        let name = client_msg.name();
                                        let mut reg = registry.write().await;
                                        let result = session.handle(&mut reg, client_msg);
                                        if let Err(e) = &result {
                                            log::warn!("Rejected {name} from {participant_id}: {e}");
                                        }
                                        stats.write().await.active_rooms = reg.room_count();
                                        result
                                    }
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        Err(e)
                                    }
                                };

                                if let Err(e) = result {
                                    stats.write().await.rejected_messages += 1;
                                    if let Err(e) = session.reply(&ServerMessage::error(e.to_string())) {
                                        return Err(ServerError::from(e));
                                    }
                                }
                            }

                            Some(Ok(Message::Binary(_))) => {
                                log::debug!("Ignoring binary frame from {addr}");
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                return Ok(());
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                return Ok(());
                            }

                            // Ping/Pong are answered by tungstenite
                            _ => {}
                        }
                    }

                    // Outgoing events queued for this participant
                    payload = outbox_rx.recv() => {
                        match payload {
                            Some(payload) => {
                                if let Err(e) = ws_sender.send(Message::Text(payload.to_string().into())).await {
                                    return Err(ServerError::from(e));
                                }
                            }
                            None => return Ok(()),
                        }
                    }

                    _ = async {
                        match heartbeat.as_mut() {
                            Some(interval) => { interval.tick().await; }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        log::trace!("Heartbeat ping to {participant_id}");
                        if let Err(e) = ws_sender.send(Message::Ping(Default::default())).await {
                            return Err(ServerError::from(e));
                        }
                    }
                }
            }
        }
        .await;

        // Cleanup: leave the room whatever ended the loop
        {
            let mut reg = registry.write().await;
            session.disconnect(&mut reg);
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = reg.room_count();
        }

        outcome
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let registry = self.registry.read().await.stats();
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = registry.room_count;
        stats.registry = registry;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// First tick one full period after connect.
fn heartbeat(interval_secs: u64) -> Option<Interval> {
    if interval_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    Some(interval_at(Instant::now() + period, period))
}
