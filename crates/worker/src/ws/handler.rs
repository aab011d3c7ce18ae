use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use genforge_core::types::DbId;
use genforge_events::registry::Outbound;
use genforge_events::ConnectionRegistry;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub owner_id: DbId,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The owner is taken from the `owner_id` query parameter; authenticating
/// it is the job of whatever sits in front of this service.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params.owner_id, state.registry))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Registers the connection, forwards queued frames to the socket from a
/// spawned task and drains inbound frames until the client goes away.
async fn handle_socket(socket: WebSocket, owner_id: DbId, registry: Arc<ConnectionRegistry>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, owner_id, "WebSocket connected");

    let mut rx = registry.add(conn_id.clone(), owner_id).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (msg, last) = match frame {
                Outbound::Text(text) => (Message::Text(text.into()), false),
                Outbound::Ping => (Message::Ping(Default::default()), false),
                Outbound::Close => (Message::Close(None), true),
            };
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if last {
                break;
            }
        }
    });

    // Clients only ever send control frames; anything else is ignored.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    registry.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, owner_id, "WebSocket disconnected");
}
