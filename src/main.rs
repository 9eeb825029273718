//! # Lucky Chamber Backend - Main Entry Point
//!
//! ## Purpose
//! Wires and runs the game orchestrator: the room manager with its per-room
//! actors, the matchmaking queue, the deposit monitor, the realtime hub and
//! the HTTP/WebSocket listener.
//!
//! ## Architecture Role
//! Every component is constructed here and handed its dependencies
//! explicitly; nothing lives in module-level state. Shutdown is a single
//! cancellation token: SIGINT stops the periodic tasks, lets each room actor
//! persist its state, and closes the listener gracefully.
//!
//! ## Component wiring
//! ```text
//! clients ── /ws ──▶ RealtimeHub ──▶ QueueManager ──▶ RoomManager (actor per room)
//!                        ▲                                  │
//!                        └───────── room events ◀───────────┘
//!                   DepositMonitor ──▶ RoomManager ──▶ WalletGateway ──▶ ChainRpc
//! ```
//!
//! ## Running the Server
//! ```bash
//! WALLET_MNEMONIC="..." TREASURY_ADDRESS="kaspatest:..." cargo run
//! ```
//! The server listens on `http://0.0.0.0:8080` (override with `PORT`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use luckychamber_axum::config::{self, Settings};
use luckychamber_axum::game::{DepositMonitor, QueueManager, RoomManager};
use luckychamber_axum::hub::RealtimeHub;
use luckychamber_axum::services::{
    ChainRpc, ChainWatcher, MemoryStore, RoomStore, SimulatedChain, WalletGateway,
};
use luckychamber_axum::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "luckychamber_axum=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let cancel = CancellationToken::new();

    // TODO: swap MemoryStore for the sqlite-backed store once it lands
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());

    // TODO: replace the simulated chain with the kaspad wRPC client
    let sim = Arc::new(SimulatedChain::new());
    spawn_sim_ticker(Arc::clone(&sim), cancel.clone());
    let chain = Arc::new(ChainWatcher::new(sim as Arc<dyn ChainRpc>));

    let wallet = Arc::new(WalletGateway::from_mnemonic(
        &settings.wallet_mnemonic,
        settings.network,
        settings.payout_max_attempts,
        settings.payout_backoff_ms,
    )?);
    tracing::info!(hot_wallet = %wallet.hot_wallet_address(), network = ?settings.network, "wallet ready");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (assignments_tx, assignments_rx) = mpsc::unbounded_channel();

    let rooms = Arc::new(RoomManager::new(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::clone(&wallet),
        Arc::clone(&settings),
        events_tx,
        cancel.clone(),
    ));
    rooms.start().await?;

    let queue = Arc::new(QueueManager::new(
        Arc::clone(&rooms),
        Arc::clone(&settings),
        assignments_tx,
    ));
    Arc::clone(&queue).spawn_sweeper(cancel.clone());

    let hub = Arc::new(RealtimeHub::new(
        Arc::clone(&rooms),
        Arc::clone(&queue),
        Arc::clone(&settings),
        cancel.clone(),
    ));
    Arc::clone(&hub).spawn_event_pump(events_rx);
    Arc::clone(&hub).spawn_assignment_pump(assignments_rx);
    Arc::clone(&hub).spawn_broadcast_tick();

    DepositMonitor::new(
        Arc::clone(&rooms),
        Arc::clone(&chain),
        Duration::from_millis(settings.deposit_poll_interval_ms),
        cancel.clone(),
    )
    .spawn();

    let state = AppState {
        rooms: Arc::clone(&rooms),
        hub: Arc::clone(&hub),
    };
    let app = app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("🚀 Lucky Chamber server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await?;

    Ok(())
}

/// Advances the simulated chain so locked rooms reach their settlement block
/// during local development.
fn spawn_sim_ticker(sim: Arc<SimulatedChain>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => sim.advance_daa(1),
            }
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    cancel.cancel();
}
