//! WebSocket fan-out for real-time escrow and claim updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::escrow::DomainEvent;

use futures_util::{SinkExt, StreamExt};

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    /// Broadcast channel for domain events
    pub tx: broadcast::Sender<DomainEvent>,
}

/// Server message envelope
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: DomainEvent },
}

impl WsState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    /// Broadcast domain events to all connected clients
    pub fn broadcast(&self, events: &[DomainEvent]) {
        for event in events {
            // Send fails only when no client is connected; that is fine.
            let _ = self.tx.send(event.clone());
        }
    }
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection: forward broadcast events until the client
/// goes away
async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.tx.subscribe();

    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let msg = ServerMessage::Event { event };
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
}
