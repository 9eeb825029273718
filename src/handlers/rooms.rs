//! Read-only room listing for lobby browsers. The orchestrator itself never
//! depends on this surface.

use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

/// List rooms still accepting players
///
/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    match state.rooms.open_rooms().await {
        Ok(rooms) => Json(serde_json::json!({
            "success": true,
            "rooms": rooms,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "room listing failed");
            Json(serde_json::json!({
                "error": "failed to list rooms"
            }))
        }
    }
}
