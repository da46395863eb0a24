use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::protocol::ControlMessage;
use crate::state::AppState;

// upgrade to the realtime websocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// forward one room's broadcast into the socket's outbound queue
fn forward_room(
    event_id: String,
    mut room: broadcast::Receiver<String>,
    outbound: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match room.recv().await {
                Ok(frame) => {
                    if outbound.send(frame).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Socket lagged {} frame(s) behind in room {}", skipped, event_id);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<String>();
    let mut rooms: HashMap<String, JoinHandle<()>> = HashMap::new();
    tracing::debug!("🔌 Realtime socket opened");

    loop {
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(ControlMessage::JoinRoom { event_id }) => {
                        if !rooms.contains_key(&event_id) {
                            tracing::debug!("Socket joined room {}", event_id);
                            let room = state.rooms.subscribe(&event_id);
                            let task = forward_room(event_id.clone(), room, outbound.clone());
                            rooms.insert(event_id, task);
                        }
                    }
                    Ok(ControlMessage::LeaveRoom { event_id }) => {
                        if let Some(task) = rooms.remove(&event_id) {
                            tracing::debug!("Socket left room {}", event_id);
                            task.abort();
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring malformed control message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Socket read failed: {}", e);
                    break;
                }
            },
            Some(frame) = frames.recv() => {
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in rooms {
        task.abort();
    }
    tracing::debug!("Realtime socket closed");
}
