//! Lucky Chamber backend: a Kaspa-staked elimination-game orchestrator.
//!
//! Players stake KAS into per-seat deposit addresses, a commit-reveal RNG
//! anchored to a future block drives the elimination rounds, and the pooled
//! stakes minus the house cut pay out to the surviving seats in a single
//! transaction. Aborted games refund each confirmed deposit to its payer.
//!
//! The binary in `main.rs` wires the components; everything is exported here
//! so the integration tests can drive the orchestrator directly.

pub mod config;
pub mod error;
pub mod game;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod rng;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::game::RoomManager;
use crate::hub::RealtimeHub;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub hub: Arc<RealtimeHub>,
}

/// Builds the application router with CORS and request tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/rooms", get(handlers::list_rooms))
        .route("/ws", get(handlers::ws_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
