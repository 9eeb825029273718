//! # Request Handlers Module
//!
//! ## Purpose
//! The thin axum layer over the orchestrator: the WebSocket upgrade, a
//! health probe, and the read-only room listing. All game logic stays behind
//! the hub and the room manager; handlers only translate HTTP.

pub mod rooms;
pub mod ws;

pub use rooms::*;
pub use ws::*;

use axum::{response::IntoResponse, Json};

use crate::utils::now_millis;

/// Health check endpoint
///
/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "luckychamber-axum",
        "timestamp": now_millis() / 1000,
    }))
}
