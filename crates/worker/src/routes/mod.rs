pub mod health;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws?owner_id=                                    WebSocket push channel
/// /webhooks/{provider}                             provider notification intake (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/webhooks/{provider}", post(webhooks::receive))
}
