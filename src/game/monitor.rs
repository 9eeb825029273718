//! # Deposit Monitor
//!
//! ## Purpose
//! The one task that reconciles on-chain funds with expected seats. Each
//! tick it scans every LOBBY/FUNDING room, batch-queries the UTXO sets of
//! occupied unconfirmed deposit addresses, and notifies the owning room
//! actor when an address holds at least the seat price. Confirmation is
//! "aggregate amount at the address", so a deposit split across several
//! UTXOs counts and over-deposits are accepted without inflating the pot.
//!
//! Chain errors are absorbed: the tick logs, gives up, and the next tick
//! retries. A room whose funding window closes during an outage aborts
//! through its own expiry deadline, never through the monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::game::rooms::RoomManager;
use crate::services::ChainWatcher;

pub struct DepositMonitor {
    rooms: Arc<RoomManager>,
    chain: Arc<ChainWatcher>,
    interval: Duration,
    cancel: CancellationToken,
}

impl DepositMonitor {
    pub fn new(
        rooms: Arc<RoomManager>,
        chain: Arc<ChainWatcher>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rooms,
            chain,
            interval,
            cancel,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "deposit monitor running");
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => self.tick().await,
                }
            }
            tracing::info!("deposit monitor stopped");
        });
    }

    /// One reconciliation pass. Public so tests can drive it deterministically.
    pub async fn tick(&self) {
        let rooms = match self.rooms.funding_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!(error = %e, "deposit scan could not list rooms");
                return;
            }
        };
        for room in rooms {
            let pending: Vec<_> = room
                .seats
                .iter()
                .filter(|s| s.is_occupied() && !s.confirmed)
                .map(|s| (s.index, s.deposit_address.clone()))
                .collect();
            if pending.is_empty() {
                continue;
            }
            let addresses: Vec<String> = pending.iter().map(|(_, a)| a.clone()).collect();
            let utxos = match self.chain.utxos_by_address(&addresses).await {
                Ok(utxos) => utxos,
                Err(e) => {
                    tracing::warn!(room = %room.id, error = %e, "deposit scan failed, retrying next tick");
                    continue;
                }
            };
            for (seat_index, address) in pending {
                let entries = match utxos.get(&address) {
                    Some(entries) if !entries.is_empty() => entries,
                    _ => continue,
                };
                let total: u64 = entries.iter().map(|u| u.amount).sum();
                if total >= room.seat_price {
                    let tx_id = entries[0].outpoint.transaction_id.clone();
                    self.rooms
                        .notify_seat_funded(&room.id, seat_index, tx_id, total);
                }
            }
        }
    }
}
