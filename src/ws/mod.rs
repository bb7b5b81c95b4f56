pub mod connection;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::StreamExt;
use std::sync::Arc;

use crate::state::AppState;
use connection::{ClientConnection, Disconnect};

/// WebSocket upgrade handler for `/subscribe`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, state).await;
    })
}

/// Run one client to completion. The writer loop runs on this task; the
/// connection spawns and owns the reader.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) -> Disconnect {
    let (sender, receiver) = socket.split();

    let mut connection = ClientConnection::new(&state);
    let disconnect = connection.run(sender, receiver).await;

    let stats = connection.stats();
    tracing::info!(
        client_id = connection.client_id().map(String::as_str).unwrap_or("-"),
        frames_received = stats.frames_received(),
        frames_sent = stats.frames_sent(),
        decode_errors = stats.decode_errors(),
        "WebSocket connection closed"
    );

    disconnect
}
