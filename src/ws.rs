use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::handlers::AppState;
use crate::notify::{Notification, FILE_BROWSER_ROOM, SHARED_TEXT_ROOM};
use crate::protocol::{ClientMessage, ErrorInfo, ServerMessage};
use crate::shared_text::SharedTextStore;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket connection established");

    // Subscribe before the greeting so nothing published in between is missed.
    let mut events = state.broadcaster.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut rooms: HashSet<String> = [FILE_BROWSER_ROOM, SHARED_TEXT_ROOM]
        .into_iter()
        .map(String::from)
        .collect();

    let greeting = ServerMessage::Event(Notification::shared_text_changed(&state.shared_text.get()));
    if !send(&mut sender, &greeting).await {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!("WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                let msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("Ignoring malformed message: {e}");
                        continue;
                    }
                };

                match msg {
                    ClientMessage::Join { room } => {
                        debug!("Client joined room '{room}'");
                        rooms.insert(room);
                    }
                    ClientMessage::Leave { room } => {
                        rooms.remove(&room);
                    }
                    ClientMessage::Ping => {
                        if !send(&mut sender, &ServerMessage::Pong).await {
                            break;
                        }
                    }
                    ClientMessage::UpdateSharedText { content } => {
                        if let Err(info) = update_shared_text(Arc::clone(&state.shared_text), content).await {
                            if !send(&mut sender, &ServerMessage::Error(info)).await {
                                break;
                            }
                        }
                    }
                }
            }

            event = events.recv() => match event {
                Ok(notification) => {
                    if rooms.contains(&notification.room)
                        && !send(&mut sender, &ServerMessage::Event(notification)).await
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {skipped} notification(s)");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("WebSocket connection closed");
}

/// The store's change hook broadcasts the new text, this client included.
/// Failures come back as the error frame to send to this client.
async fn update_shared_text(store: Arc<SharedTextStore>, content: String) -> Result<(), ErrorInfo> {
    let failure = |code: &str, message: String| ErrorInfo {
        code: code.to_string(),
        message,
        details: None,
    };
    match tokio::task::spawn_blocking(move || store.set(&content)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Failed to save shared text: {e:#}");
            Err(failure("PERSIST_FAILED", format!("{e:#}")))
        }
        Err(e) => {
            error!("Shared text task failed: {e}");
            Err(failure("INTERNAL_ERROR", e.to_string()))
        }
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode message: {e}");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}
