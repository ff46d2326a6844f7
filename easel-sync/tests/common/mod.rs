//! Helpers shared by the integration tests: a real server on a free port,
//! connected clients, and waiting on server events with a timeout.

#![allow(dead_code)]

use easel_sync::client::{ClientConfig, SyncClient, SyncEvent};
use easel_sync::protocol::{ClientMessage, ParticipantId, Point, ServerMessage, StrokeDraft, StrokeStyle, Tool};
use easel_sync::server::{ServerConfig, SyncServer};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(3);

/// Start a server on a free port. Returns its URL and a handle for stats.
pub async fn start_test_server() -> (String, SyncServer) {
    start_server_with(64).await
}

pub async fn start_server_with(ephemeral_capacity: usize) -> (String, SyncServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ephemeral_capacity,
        heartbeat_interval_secs: 30,
    };
    let server = SyncServer::new(config);
    let handle = server.clone();
    tokio::spawn(async move {
        handle.serve(listener).await.unwrap();
    });
    (format!("ws://127.0.0.1:{port}"), server)
}

/// A connected client that has already received its `full_sync`.
pub struct TestClient {
    pub client: SyncClient,
    pub events: Receiver<SyncEvent>,
    pub id: ParticipantId,
    pub full_sync: ServerMessage,
}

pub async fn connect_client(url: &str, room: &str, name: &str) -> TestClient {
    connect_with(ClientConfig::new(url, room, name)).await
}

pub async fn connect_with(config: ClientConfig) -> TestClient {
    let mut client = SyncClient::new(config);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();

    let full_sync = wait_for(&mut events, |m| matches!(m, ServerMessage::FullSync { .. })).await;
    let id = match &full_sync {
        ServerMessage::FullSync { participant_id, .. } => *participant_id,
        _ => unreachable!(),
    };
    assert_eq!(client.participant_id().await, Some(id));

    TestClient {
        client,
        events,
        id,
        full_sync,
    }
}

/// Skip events until one matches `pred`.
pub async fn wait_for<F>(events: &mut Receiver<SyncEvent>, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(SyncEvent::Server(msg)) if pred(&msg) => return msg,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for server event")
}

/// Collect the ids of the next `count` committed operations.
pub async fn committed_ids(events: &mut Receiver<SyncEvent>, count: usize) -> Vec<u64> {
    let mut ids = Vec::with_capacity(count);
    while ids.len() < count {
        if let ServerMessage::OperationCommitted { operation } =
            wait_for(events, |m| matches!(m, ServerMessage::OperationCommitted { .. })).await
        {
            ids.push(operation.id);
        }
    }
    ids
}

pub fn brush() -> StrokeStyle {
    StrokeStyle::new("#4363D8", 4.0, Tool::Brush)
}

pub fn draft(coords: &[(f64, f64)]) -> StrokeDraft {
    StrokeDraft::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect(), &brush())
}

// ─── Raw sockets ─────────────────────────────────────────────────

pub async fn raw_connect(url: &str) -> RawSocket {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

pub async fn raw_send(ws: &mut RawSocket, msg: &ClientMessage) {
    raw_send_text(ws, &msg.encode().unwrap()).await;
}

pub async fn raw_send_text(ws: &mut RawSocket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next text frame, decoded.
pub async fn raw_recv(ws: &mut RawSocket) -> ServerMessage {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return ServerMessage::decode(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Poll the server until `pred` holds for its stats.
pub async fn wait_for_stats<F>(server: &SyncServer, mut pred: F)
where
    F: FnMut(&easel_sync::server::ServerStats) -> bool,
{
    timeout(WAIT, async {
        loop {
            if pred(&server.stats().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server stats never reached the expected state")
}
