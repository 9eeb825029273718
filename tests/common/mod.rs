//! Shared harness: a full orchestrator wired against the simulated chain and
//! the in-memory store, with timings tightened for tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use luckychamber_axum::config::{Network, Settings};
use luckychamber_axum::game::{DepositMonitor, QueueManager, RoomAssignment, RoomManager};
use luckychamber_axum::hub::RealtimeHub;
use luckychamber_axum::models::{RoomSnapshot, RoomState, SOMPI_PER_KAS};
use luckychamber_axum::services::{
    ChainRpc, ChainWatcher, MemoryStore, RoomStore, SimulatedChain, WalletGateway,
};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Settings that keep integration runs fast: instant pre-turn and results
/// grace, server-driven turns by default, tiny payout backoff.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.wallet_mnemonic = TEST_MNEMONIC.to_string();
    settings.treasury_address = "kaspatest:treasury0000000000000000000000000000".to_string();
    settings.quick_match.min_players = 2;
    settings.quick_match.max_players = 2;
    settings.turn_timeout_seconds = 0;
    settings.pre_turn_grace_seconds = 0;
    settings.results_grace_seconds = 0;
    settings.payout_max_attempts = 3;
    settings.payout_backoff_ms = 10;
    settings
}

pub struct TestWorld {
    pub settings: Arc<Settings>,
    pub sim: Arc<SimulatedChain>,
    pub chain: Arc<ChainWatcher>,
    pub wallet: Arc<WalletGateway>,
    pub store: Arc<MemoryStore>,
    pub rooms: Arc<RoomManager>,
    pub queue: Arc<QueueManager>,
    pub hub: Arc<RealtimeHub>,
    pub monitor: DepositMonitor,
    pub assignments: mpsc::UnboundedReceiver<RoomAssignment>,
    pub cancel: CancellationToken,
}

impl TestWorld {
    pub async fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let cancel = CancellationToken::new();
        let sim = Arc::new(SimulatedChain::new());
        let chain = Arc::new(ChainWatcher::new(
            Arc::clone(&sim) as Arc<dyn ChainRpc>
        ));
        let wallet = Arc::new(
            WalletGateway::from_mnemonic(
                &settings.wallet_mnemonic,
                Network::Testnet10,
                settings.payout_max_attempts,
                settings.payout_backoff_ms,
            )
            .unwrap(),
        );
        // the hot wallet funds payouts and refunds
        sim.credit(wallet.hot_wallet_address(), 100_000 * SOMPI_PER_KAS)
            .await;

        let store = Arc::new(MemoryStore::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (assignments_tx, assignments_rx) = mpsc::unbounded_channel();

        let rooms = Arc::new(RoomManager::new(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            Arc::clone(&chain),
            Arc::clone(&wallet),
            Arc::clone(&settings),
            events_tx,
            cancel.clone(),
        ));
        rooms.start().await.unwrap();

        let queue = Arc::new(QueueManager::new(
            Arc::clone(&rooms),
            Arc::clone(&settings),
            assignments_tx,
        ));
        let hub = Arc::new(RealtimeHub::new(
            Arc::clone(&rooms),
            Arc::clone(&queue),
            Arc::clone(&settings),
            cancel.clone(),
        ));
        Arc::clone(&hub).spawn_event_pump(events_rx);

        let monitor = DepositMonitor::new(
            Arc::clone(&rooms),
            Arc::clone(&chain),
            Duration::from_millis(50),
            cancel.clone(),
        );

        Self {
            settings,
            sim,
            chain,
            wallet,
            store,
            rooms,
            queue,
            hub,
            monitor,
            assignments: assignments_rx,
            cancel,
        }
    }

    /// Seats `wallets` into a freshly created room and returns its id.
    pub async fn seated_room(&self, wallets: &[&str], max_players: usize) -> String {
        let room_id = self
            .rooms
            .create_room(
                luckychamber_axum::models::GameMode::Regular,
                10 * SOMPI_PER_KAS,
                2,
                max_players,
                60,
            )
            .await
            .unwrap();
        for wallet in wallets {
            self.rooms.join_room(&room_id, wallet).await.unwrap();
        }
        room_id
    }

    /// Credits every occupied seat's deposit address with the seat price and
    /// runs the monitor until the seats confirm.
    pub async fn fund_all_seats(&self, room_id: &str) {
        let snapshot = self.rooms.snapshot(room_id).await.unwrap();
        for seat in snapshot.seats.iter().filter(|s| s.wallet_address.is_some()) {
            self.sim.credit(&seat.deposit_address, snapshot.seat_price).await;
        }
        self.monitor.tick().await;
        self.wait_until(room_id, |s| s.seats.iter().filter(|x| x.wallet_address.is_some()).all(|x| x.confirmed))
            .await;
    }

    pub async fn submit_seed(&self, room_id: &str, wallet: &str, seat_index: usize, seed: &str) {
        self.rooms
            .submit_seed(room_id, wallet, seat_index, seed)
            .await
            .unwrap();
    }

    /// Advances the simulated chain past the settlement height.
    pub async fn reach_settlement(&self, room_id: &str) {
        let snapshot = self.wait_until(room_id, |s| s.state == RoomState::Locked).await;
        let target = snapshot.settlement_block_height.unwrap();
        let current = self.sim.daa_score();
        if target > current {
            self.sim.advance_daa(target - current);
        }
    }

    /// Polls the room snapshot until the predicate holds (10 s cap).
    pub async fn wait_until(
        &self,
        room_id: &str,
        predicate: impl Fn(&RoomSnapshot) -> bool,
    ) -> RoomSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = self.rooms.snapshot(room_id).await.unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "room {room_id} never reached the expected condition; state={:?} rounds={}",
                    snapshot.state,
                    snapshot.rounds.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub async fn wait_for_state(&self, room_id: &str, state: RoomState) -> RoomSnapshot {
        self.wait_until(room_id, |s| s.state == state).await
    }
}
