//! WebSocket-Endpunkt – Upgrade und Verbindungs-Tasks
//!
//! `GET /ws` wird auf WebSocket hochgestuft. Jede Verbindung bekommt eine
//! frische Connection-ID (UUID v4) und laeuft als eigener Task.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use callrelay_core::ConnectionId;
use std::sync::Arc;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// Standardpfad des WebSocket-Endpunkts
pub const WS_PFAD: &str = "/ws";

/// Axum-Router fuer den WebSocket-Endpunkt
pub fn ws_router(state: Arc<SignalingState>, pfad: &str) -> Router {
    Router::new()
        .route(pfad, get(ws_handler))
        .with_state(state)
}

/// `GET /ws` – Upgrade auf WebSocket
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<SignalingState>>) -> Response {
    let online = state.presence.online_anzahl();
    if online >= state.config.max_clients {
        tracing::warn!(
            online,
            max = state.config.max_clients,
            "Server voll – Verbindung abgelehnt"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Server voll").into_response();
    }

    let connection_id = ConnectionId::neu();
    let shutdown_rx = state.shutdown_rx.clone();
    tracing::debug!(connection_id = %connection_id, "WebSocket-Upgrade");

    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| {
            ClientConnection::neu(state, connection_id).verarbeiten(socket, shutdown_rx)
        })
}
