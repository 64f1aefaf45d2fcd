use super::handlers::{Disposition, handle_client_text};
use super::{ConnectionGuard, RelayState};
use crate::security::{bearer_token, token_matches};
use crate::transport::protocol::ServerMessage;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Close code sent when the relay is full ("try again later").
const CLOSE_AT_CAPACITY: u16 = 1013;
const DIRECT_BUFFER: usize = 128;

enum Outbound {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

pub async fn ws_handler(
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    if state.config.relay.require_token {
        let authenticated = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .is_some_and(|token| token_matches(token, &state.config.relay.tokens));

        if !authenticated {
            return (
                StatusCode::UNAUTHORIZED,
                "WebSocket upgrade requires a bearer token",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: RelayState) {
    let connection_id = Uuid::new_v4();
    // Subscribe first so this connection sees its own online-count update.
    let broadcast_rx = state.broadcast_tx.subscribe();

    let Some(guard) = ConnectionGuard::acquire(&state) else {
        let close = Message::Close(Some(CloseFrame {
            code: CLOSE_AT_CAPACITY,
            reason: "relay at capacity".into(),
        }));
        let _ = socket.send(close).await;
        return;
    };
    tracing::debug!(%connection_id, online = state.online_count(), "client connected");

    let (sink, mut stream) = socket.split();
    let (direct_tx, direct_rx) = mpsc::channel(DIRECT_BUFFER);
    let writer = tokio::spawn(write_loop(sink, broadcast_rx, direct_rx, connection_id));

    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%connection_id, "websocket receive error: {error}");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let notice = ServerMessage::error("binary frames must be UTF-8 JSON");
                    if direct_tx.send(Outbound::Message(notice)).await.is_err() {
                        break;
                    }
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        match handle_client_text(&state, &text) {
            Disposition::Reply(messages) => {
                let mut delivered = true;
                for message in messages {
                    if direct_tx.send(Outbound::Message(message)).await.is_err() {
                        delivered = false;
                        break;
                    }
                }
                if !delivered {
                    break;
                }
            }
            Disposition::Close { code, reason } => {
                tracing::info!(%connection_id, code, "closing connection: {reason}");
                let _ = direct_tx.send(Outbound::Close { code, reason }).await;
                break;
            }
        }
    }

    drop(direct_tx);
    if let Err(error) = writer.await {
        tracing::debug!(%connection_id, "websocket writer failed: {error}");
    }
    drop(guard);
    tracing::debug!(%connection_id, "client disconnected");
}

/// Merge broadcast fan-out and this connection's direct replies into the
/// socket. Direct replies take priority.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut broadcast_rx: broadcast::Receiver<ServerMessage>,
    mut direct_rx: mpsc::Receiver<Outbound>,
    connection_id: Uuid,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            direct = direct_rx.recv() => match direct {
                Some(outbound) => outbound,
                None => break,
            },
            broadcast = broadcast_rx.recv() => match broadcast {
                Ok(message) => Outbound::Message(message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%connection_id, skipped, "websocket client lagging; dropped broadcasts");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        match outbound {
            Outbound::Message(message) => {
                if send_message(&mut sink, &message).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = message.to_json();
    sink.send(Message::Text(json.into())).await
}
