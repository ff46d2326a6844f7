//! WebSocket client for a canvas room.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect), re-joining the
//!   configured room every time so the server answers with a fresh `full_sync`
//! - One send method per inbound event
//! - Decoded server events delivered through an mpsc channel
//!
//! Committed history lives on the server only. Nothing is buffered while
//! disconnected: authoritative sends fail and ephemeral sends are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    ClientMessage, ParticipantId, ProtocolError, ServerMessage, StrokeDraft, StrokeStyle,
};
use crate::reconcile::CanvasReconciler;

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the authority, e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    pub room_id: String,
    /// Empty means the server picks `User<N>`
    pub display_name: String,
    /// Douglas–Peucker tolerance applied to finished strokes (None = off)
    pub simplify_tolerance: Option<f64>,
}

impl ClientConfig {
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            room_id: room_id.into(),
            display_name: display_name.into(),
            simplify_tolerance: None,
        }
    }

    pub fn with_simplify_tolerance(mut self, tolerance: f64) -> Self {
        self.simplify_tolerance = Some(tolerance);
        self
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established, `join` sent
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// Any event pushed by the server
    Server(ServerMessage),
}

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Our id, learned from `full_sync`
    participant_id: Arc<RwLock<Option<ParticipantId>>>,

    /// Bumped on every connect so a stale reader cannot flip the state of a newer connection
    generation: Arc<AtomicU64>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            participant_id: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and join the configured room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.config.server_url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.config.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Writer task: forward outgoing channel to WebSocket, close when the channel ends
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let join = ClientMessage::Join {
            room_id: self.config.room_id.clone(),
            display_name: self.config.display_name.clone(),
        };
        out_tx
            .send(join.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx);

        *self.participant_id.write().await = None;
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;
        log::info!("Connected to {} room {}", self.config.server_url, self.config.room_id);

        // Reader task: decode incoming events and hand them to the application
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let participant_id = self.participant_id.clone();
        let current_generation = self.generation.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(server_msg) => {
                            if let ServerMessage::FullSync { participant_id: id, .. } = &server_msg {
                                *participant_id.write().await = Some(*id);
                            }
                            let _ = event_tx.send(SyncEvent::Server(server_msg)).await;
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            if current_generation.load(Ordering::SeqCst) == generation {
                *state.write().await = ConnectionState::Disconnected;
            }
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. Any stroke in progress is simply abandoned.
    pub async fn disconnect(&mut self) {
        // Dropping the sender makes the writer send a close frame
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Drop the current connection (if any) and connect again.
    pub async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        self.disconnect().await;
        self.connect().await
    }

    pub async fn stroke_start(&self, x: f64, y: f64, style: &StrokeStyle) -> Result<(), ProtocolError> {
        self.send_ephemeral(&ClientMessage::StrokeStart {
            x,
            y,
            color: style.color.clone(),
            width: style.width,
            tool: style.tool,
        })
        .await
    }

    pub async fn stroke_move(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send_ephemeral(&ClientMessage::StrokeMove { x, y }).await
    }

    /// Submit a finished stroke for commit.
    pub async fn stroke_end(&self, draft: StrokeDraft) -> Result<(), ProtocolError> {
        self.send_reliable(&ClientMessage::StrokeEnd(draft)).await
    }

    /// Global undo of the room's latest operation.
    pub async fn undo(&self) -> Result<(), ProtocolError> {
        self.send_reliable(&ClientMessage::Undo).await
    }

    pub async fn cursor_move(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send_ephemeral(&ClientMessage::CursorMove { x, y }).await
    }

    /// Ask for a stats snapshot; the answer arrives as a `Server(Stats(..))` event.
    pub async fn request_stats(&self) -> Result<(), ProtocolError> {
        self.send_reliable(&ClientMessage::Stats).await
    }

    /// Reconciler configured with this client's simplification tolerance.
    pub fn reconciler(&self) -> CanvasReconciler {
        CanvasReconciler::new(self.config.simplify_tolerance)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Our participant id, once the server has sent `full_sync`.
    pub async fn participant_id(&self) -> Option<ParticipantId> {
        *self.participant_id.read().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send_reliable(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx.send(encoded).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    async fn send_ephemeral(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Ok(()); // Silently drop ephemeral traffic when offline
        }
        let encoded = msg.encode()?;
        if let Some(tx) = &self.outgoing_tx {
            if tx.try_send(encoded).is_err() {
                log::trace!("Dropped outgoing {}", msg.name());
            }
        }
        Ok(())
    }
}
