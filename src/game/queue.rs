//! # Matchmaking Queue
//!
//! ## Purpose
//! Buckets waiting wallets by `(mode, seat price)` and materializes a full
//! bucket into a room. A wallet sits in at most one bucket; re-joining moves
//! it. Buckets drain first-in-first-out, entries older than the TTL are
//! purged by a periodic sweeper, and each created room is announced through a
//! typed assignment channel so the hub can push `room:assigned` to every
//! matched client.
//!
//! Two lanes share the bucket map: the quick-match lane (the configured
//! quick-match price) and the custom lane (any other price within the
//! custom-room bounds). Each lane carries its own cardinality and funding
//! timeout, so a custom-priced bucket fills and expires on the custom-room
//! profile rather than the quick-match one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{RoomParams, Settings};
use crate::error::{GameError, GameResult};
use crate::game::rooms::RoomManager;
use crate::models::GameMode;
use crate::utils::now_millis;

/// Fired when a bucket fills and a room is created from it.
#[derive(Debug, Clone)]
pub struct RoomAssignment {
    pub room_id: String,
    pub wallets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    mode: GameMode,
    seat_price: u64,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    wallet: String,
    joined_at: u64,
}

pub struct QueueManager {
    rooms: Arc<RoomManager>,
    settings: Arc<Settings>,
    assignments: mpsc::UnboundedSender<RoomAssignment>,
    buckets: Mutex<HashMap<BucketKey, VecDeque<QueueEntry>>>,
}

impl QueueManager {
    pub fn new(
        rooms: Arc<RoomManager>,
        settings: Arc<Settings>,
        assignments: mpsc::UnboundedSender<RoomAssignment>,
    ) -> Self {
        Self {
            rooms,
            settings,
            assignments,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Joins (or moves) a wallet into the `(mode, seat_price)` bucket.
    /// Returns the number of wallets waiting in that bucket afterwards;
    /// zero means the bucket just drained into a room.
    pub async fn join(
        &self,
        wallet: &str,
        mode: GameMode,
        seat_price: u64,
    ) -> GameResult<usize> {
        let profile = self.profile_for(seat_price)?;
        let key = BucketKey { mode, seat_price };
        let matched = {
            let mut buckets = self.buckets.lock().await;
            // single bucket membership: a re-join moves the wallet
            for entries in buckets.values_mut() {
                entries.retain(|e| e.wallet != wallet);
            }
            let entries = buckets.entry(key.clone()).or_default();
            entries.push_back(QueueEntry {
                wallet: wallet.to_string(),
                joined_at: now_millis(),
            });
            if entries.len() >= profile.min_players {
                let take = entries.len().min(profile.max_players);
                Some(entries.drain(..take).collect::<Vec<_>>())
            } else {
                None
            }
        };

        match matched {
            Some(entries) => {
                self.materialize(key, profile, entries).await;
                Ok(0)
            }
            None => Ok(self.waiting(mode, seat_price).await),
        }
    }

    /// The room profile governing a bucket: the quick-match lane for exactly
    /// the configured quick-match price, the custom-room lane for any other
    /// price within its bounds.
    fn profile_for(&self, seat_price: u64) -> GameResult<RoomParams> {
        let quick = &self.settings.quick_match;
        if seat_price == quick.seat_price {
            return Ok(quick.clone());
        }
        let custom = &self.settings.custom_room;
        if seat_price < custom.min_seat_price || seat_price > custom.max_seat_price {
            return Err(GameError::validation("seat price out of bounds"));
        }
        Ok(RoomParams {
            seat_price,
            min_players: custom.min_players,
            max_players: custom.max_players,
            timeout_seconds: custom.timeout_seconds,
        })
    }

    /// Removes the wallet from whichever bucket holds it. Returns the bucket
    /// it was in, with the remaining count, so the hub can broadcast an
    /// updated waiting figure.
    pub async fn leave(&self, wallet: &str) -> Option<(GameMode, u64, usize)> {
        let mut buckets = self.buckets.lock().await;
        for (key, entries) in buckets.iter_mut() {
            let before = entries.len();
            entries.retain(|e| e.wallet != wallet);
            if entries.len() < before {
                return Some((key.mode, key.seat_price, entries.len()));
            }
        }
        None
    }

    pub async fn waiting(&self, mode: GameMode, seat_price: u64) -> usize {
        self.buckets
            .lock()
            .await
            .get(&BucketKey { mode, seat_price })
            .map(|e| e.len())
            .unwrap_or(0)
    }

    /// Purges entries older than the TTL; their wallets must re-join.
    pub async fn sweep_stale(&self) -> usize {
        let cutoff = now_millis().saturating_sub(self.settings.queue_ttl_seconds * 1000);
        let mut buckets = self.buckets.lock().await;
        let mut purged = 0;
        for entries in buckets.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.joined_at >= cutoff);
            purged += before - entries.len();
        }
        buckets.retain(|_, e| !e.is_empty());
        if purged > 0 {
            tracing::debug!(purged, "stale queue entries swept");
        }
        purged
    }

    /// Runs the TTL sweeper until cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let interval = Duration::from_secs(30);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        self.sweep_stale().await;
                    }
                }
            }
        });
    }

    /// Creates the room and seats every matched wallet in drain order. The
    /// room is sized exactly to the matched group so it locks as soon as
    /// everyone funds. On failure the entries go back to the front of their
    /// bucket.
    async fn materialize(&self, key: BucketKey, profile: RoomParams, entries: Vec<QueueEntry>) {
        let created = self
            .rooms
            .create_room(
                key.mode,
                key.seat_price,
                profile.min_players,
                entries.len(),
                profile.timeout_seconds,
            )
            .await;
        let room_id = match created {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "room creation from queue failed, requeueing");
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(key).or_default();
                for entry in entries.into_iter().rev() {
                    bucket.push_front(entry);
                }
                return;
            }
        };

        let mut wallets = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.rooms.join_room(&room_id, &entry.wallet).await {
                Ok(seat) => {
                    tracing::debug!(room = %room_id, wallet = %entry.wallet, seat, "queued wallet seated");
                    wallets.push(entry.wallet.clone());
                }
                Err(e) => {
                    tracing::error!(room = %room_id, wallet = %entry.wallet, error = %e, "seating matched wallet failed");
                }
            }
        }
        tracing::info!(room = %room_id, players = wallets.len(), "queue matched into room");
        let _ = self.assignments.send(RoomAssignment { room_id, wallets });
    }
}
