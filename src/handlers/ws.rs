//! # WebSocket Upgrade Handler
//!
//! ## Purpose
//! Accepts the WebSocket upgrade, caps inbound frames at the protocol
//! maximum, and hands the socket to the realtime hub together with the
//! client address (used for per-IP connection limits). Everything after the
//! upgrade lives in `hub`.

use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
};

use crate::models::MAX_FRAME_BYTES;
use crate::AppState;

/// WebSocket endpoint
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| hub.handle_socket(socket, addr.ip()))
}
