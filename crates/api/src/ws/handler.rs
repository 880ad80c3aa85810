//! WebSocket upgrade handler.
//!
//! Connections are one-way: the server pushes serialized project events;
//! inbound frames other than Close are ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// GET /api/v1/ws -- upgrade and stream live project events.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::now_v7().to_string();
    let mut outbound = state.ws_manager.add(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    tracing::debug!(conn_id = %conn_id, "WebSocket client connected");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                match message {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Manager dropped the sender (shutdown).
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.ws_manager.remove(&conn_id).await;
    tracing::debug!(conn_id = %conn_id, "WebSocket client disconnected");
}
