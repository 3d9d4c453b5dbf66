//! Policy change stream over WebSocket.
//!
//! Each [`PolicyEvent`](crate::policy::PolicyEvent) is sent as one JSON text
//! frame. The stream ends when the client closes, the engine goes away or
//! the service shuts down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};

use crate::admin::AdminState;
use crate::policy::engine::PolicyWatch;

pub async fn watch_policies(ws: WebSocketUpgrade, State(state): State<AdminState>) -> Response {
    // Subscribe before the upgrade so no change between handshake and
    // stream start is missed.
    let watch = state.executor.engine().watch();
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| stream_changes(socket, watch, shutdown))
}

async fn stream_changes(
    mut socket: WebSocket,
    mut watch: PolicyWatch,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::debug!("Policy watcher connected");
    loop {
        tokio::select! {
            change = watch.recv() => {
                let Some(change) = change else { break };
                let payload = match serde_json::to_string(&change) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode policy event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
    tracing::debug!("Policy watcher disconnected");
}
