use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::connection::ConnectionHandle;
use crate::fanout::Event;

/// Open a room subscription. The room id is taken as presented; the
/// subscription carries no authentication of its own.
pub async fn room_ws(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = ConnectionHandle::new(tx);
    let conn_id = handle.id();
    state.registry.subscribe(&room_id, handle.clone());
    tracing::info!(room = %room_id, conn = conn_id, "subscriber connected");

    // Writer task: sole owner of the sink, drains the outbound queue.
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: echo text frames, stop on close or transport error.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(payload) = serde_json::to_string(&Event::Echo(text)) {
                    handle.deliver(&payload);
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    handle.close();
    state.registry.unsubscribe(&room_id, conn_id);
    writer.abort();
    handle.mark_closed();
    tracing::info!(room = %room_id, conn = conn_id, "subscriber disconnected");
}
