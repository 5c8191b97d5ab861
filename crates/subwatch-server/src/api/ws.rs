//! Viewer WebSocket endpoint.
//!
//! Each socket gets a viewer slot in the hub. Outgoing events are drained
//! from the viewer queue by one task, incoming requests handled by
//! another; when either side ends, the viewer is removed.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use super::AppState;
use crate::fanout::ViewerHub;
use crate::protocol::{ServerEvent, ViewerRequest};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ViewerHub>) {
    let (id, mut rx) = hub.register().await;
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to serialize viewer event: {}", e),
            }
        }
    });

    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ViewerRequest>(&text) {
                    Ok(request) => recv_hub.handle_request(id, request).await,
                    Err(e) => {
                        tracing::debug!("Viewer {} sent an invalid message: {}", id, e);
                        let event = ServerEvent::request_error(format!("Invalid message: {}", e));
                        recv_hub.send_to(id, event).await;
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(id).await;
}
