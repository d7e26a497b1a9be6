//! WebSocket handling for live sessions
//!
//! Each connection gets a single writer task fed by an mpsc channel, so the
//! bridge relay and notification broadcasts share one FIFO write path.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use carelink_core::{BridgeError, ClientTransport, ConnectionSink, LiveBridge, ServerFrame, SinkError};

use crate::AppState;

/// WebSocket upgrade handler for `/live`
pub async fn live_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_socket(socket, state))
}

/// Runs one live session over a WebSocket
async fn handle_live_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(write_loop(sender, rx));

    let sink = Arc::new(WsSink { tx: tx.clone() });
    let id = state.registry.register(sink).await;
    info!("Live client connected as {id}");

    let transport = WsTransport { receiver, tx };
    let bridge = LiveBridge::new(
        id,
        state.live_config.clone(),
        state.store.clone(),
        state.registry.clone(),
        state.connector.clone(),
    )
    .with_audio_generator(state.audio.clone());

    if let Err(e) = bridge.run(transport).await {
        warn!("Live session {id} ended with error: {e}");
    }
    info!("Live client {id} disconnected");

    // the bridge deregistered the sink and dropped the transport, so the
    // writer's channel is closed by now
    let _ = writer.await;
}

async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if sender.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

/// Outbound handle stored in the registry for broadcasts
struct WsSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl ConnectionSink for WsSink {
    async fn send_text(&self, payload: &str) -> Result<(), SinkError> {
        self.tx
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Client transport the bridge drives
struct WsTransport {
    receiver: SplitStream<WebSocket>,
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl ClientTransport for WsTransport {
    async fn recv(&mut self) -> Option<String> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) => {
                    debug!("WebSocket client sent close frame");
                    return None;
                }
                Ok(Message::Ping(data)) => {
                    let _ = self.tx.send(Message::Pong(data)).await;
                }
                Ok(_) => {
                    // ignore binary and pong messages
                }
                Err(e) => {
                    debug!("WebSocket receive error: {e}");
                    return None;
                }
            }
        }
        None
    }

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), BridgeError> {
        let json =
            serde_json::to_string(frame).map_err(|e| BridgeError::Transport(e.to_string()))?;
        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|_| BridgeError::Transport("writer task gone".to_string()))
    }
}
