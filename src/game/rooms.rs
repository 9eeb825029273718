//! # Room Manager
//!
//! ## Purpose
//! Owns every live room. Each active room is serviced by exactly one actor
//! task; all mutations to a room are serialized through that actor's command
//! queue, so the manager never touches room state directly. The manager:
//! - creates rooms (seed commitment, derived deposit addresses, funding
//!   deadline) and spawns their actors
//! - re-hydrates non-terminal rooms from the store on startup, letting each
//!   actor fire any deadline that passed while the process was down
//! - routes client intents and deposit confirmations to the owning actor
//! - serves read-only snapshots, falling back to the store for rooms whose
//!   actor has finished
//!
//! Events flow one way: actors enqueue onto the hub's event channel and never
//! call back into the hub; the hub reaches rooms only through these command
//! queues.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{GameError, GameResult};
use crate::game::actor::{ActorContext, RoomActor};
use crate::models::{GameMode, Room, RoomSnapshot, RoomState, ServerEvent};
use crate::rng;
use crate::services::{ChainWatcher, RoomStore, WalletGateway};

/// An event emitted by a room actor, scoped for hub fan-out.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room_id: String,
    pub event: ServerEvent,
}

/// Commands a room actor accepts. Mutating intents carry a reply channel so
/// the hub can surface validation and state errors to the caller.
pub enum RoomCmd {
    Join {
        wallet: String,
        reply: oneshot::Sender<GameResult<usize>>,
    },
    Leave {
        wallet: String,
        reply: oneshot::Sender<GameResult<usize>>,
    },
    SubmitSeed {
        wallet: String,
        seat_index: usize,
        seed: String,
        reply: oneshot::Sender<GameResult<()>>,
    },
    /// From the deposit monitor; idempotent.
    SeatFunded {
        seat_index: usize,
        tx_id: String,
        amount: u64,
    },
    ReadyForTurn {
        wallet: String,
    },
    PullTrigger {
        wallet: String,
        reply: oneshot::Sender<GameResult<()>>,
    },
    ConfirmResultsShown {
        wallet: String,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    chain: Arc<ChainWatcher>,
    wallet: Arc<WalletGateway>,
    settings: Arc<Settings>,
    events: mpsc::UnboundedSender<RoomEvent>,
    actors: Arc<DashMap<String, mpsc::UnboundedSender<RoomCmd>>>,
    cancel: CancellationToken,
}

impl RoomManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        chain: Arc<ChainWatcher>,
        wallet: Arc<WalletGateway>,
        settings: Arc<Settings>,
        events: mpsc::UnboundedSender<RoomEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            chain,
            wallet,
            settings,
            events,
            actors: Arc::new(DashMap::new()),
            cancel,
        }
    }

    /// Re-hydrates every non-terminal room from the store. Each actor checks
    /// its own deadlines on entry, so rooms that expired while the process
    /// was down abort (with refunds) and locked rooms whose settlement block
    /// arrived advance.
    pub async fn start(&self) -> GameResult<()> {
        let open = self
            .store
            .rooms_in_states(&[
                RoomState::Lobby,
                RoomState::Funding,
                RoomState::Locked,
                RoomState::Playing,
            ])
            .await?;
        let count = open.len();
        for room in open {
            self.spawn_actor(room);
        }
        if count > 0 {
            tracing::info!(rooms = count, "resumed non-terminal rooms from store");
        }
        Ok(())
    }

    /// Creates a room in LOBBY: fresh server seed and published commitment,
    /// one derived deposit address per seat, funding deadline from the
    /// timeout. Returns the room id.
    pub async fn create_room(
        &self,
        mode: GameMode,
        seat_price: u64,
        min_players: usize,
        max_players: usize,
        timeout_seconds: u64,
    ) -> GameResult<String> {
        if min_players < 2 || max_players < min_players {
            return Err(GameError::validation(
                "rooms need at least two seats and min <= max",
            ));
        }
        if seat_price == 0 {
            return Err(GameError::validation("seat price must be positive"));
        }
        let id = Uuid::new_v4().simple().to_string();
        let seed = rng::generate_seed_commit();
        let deposit_addresses = (0..max_players)
            .map(|k| self.wallet.derive_seat_address(&id, k))
            .collect();
        let room = Room::new(
            id.clone(),
            mode,
            seat_price,
            min_players,
            max_players,
            self.settings.house_cut_percent,
            seed.server_seed,
            seed.server_commit,
            deposit_addresses,
            timeout_seconds,
        )?;
        self.store.upsert_room(&room).await?;
        tracing::info!(room = %id, ?mode, seat_price, max_players, "room created");
        self.spawn_actor(room);
        Ok(id)
    }

    fn spawn_actor(&self, room: Room) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = room.id.clone();
        self.actors.insert(id.clone(), tx);
        let actors = Arc::clone(&self.actors);
        let actor = RoomActor::new(
            room,
            rx,
            ActorContext {
                store: Arc::clone(&self.store),
                chain: Arc::clone(&self.chain),
                wallet: Arc::clone(&self.wallet),
                settings: Arc::clone(&self.settings),
                events: self.events.clone(),
                cancel: self.cancel.clone(),
            },
        );
        tokio::spawn(async move {
            actor.run().await;
            actors.remove(&id);
        });
    }

    fn actor(&self, room_id: &str) -> Option<mpsc::UnboundedSender<RoomCmd>> {
        self.actors.get(room_id).map(|entry| entry.value().clone())
    }

    async fn with_reply<T>(
        &self,
        room_id: &str,
        make: impl FnOnce(oneshot::Sender<GameResult<T>>) -> RoomCmd,
    ) -> GameResult<T> {
        let actor = self.live_actor(room_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        actor
            .send(make(reply_tx))
            .map_err(|_| GameError::state("room is no longer active"))?;
        reply_rx
            .await
            .map_err(|_| GameError::state("room is no longer active"))?
    }

    async fn live_actor(&self, room_id: &str) -> GameResult<mpsc::UnboundedSender<RoomCmd>> {
        if let Some(actor) = self.actor(room_id) {
            return Ok(actor);
        }
        match self.store.load_room(room_id).await? {
            Some(room) if room.state.is_terminal() => {
                Err(GameError::state("room has already concluded"))
            }
            Some(_) => Err(GameError::state("room is no longer active")),
            None => Err(GameError::validation("unknown room")),
        }
    }

    pub async fn join_room(&self, room_id: &str, wallet: &str) -> GameResult<usize> {
        let wallet = wallet.to_string();
        self.with_reply(room_id, |reply| RoomCmd::Join { wallet, reply })
            .await
    }

    pub async fn leave_room(&self, room_id: &str, wallet: &str) -> GameResult<usize> {
        let wallet = wallet.to_string();
        self.with_reply(room_id, |reply| RoomCmd::Leave { wallet, reply })
            .await
    }

    pub async fn submit_seed(
        &self,
        room_id: &str,
        wallet: &str,
        seat_index: usize,
        seed: &str,
    ) -> GameResult<()> {
        let wallet = wallet.to_string();
        let seed = seed.to_string();
        self.with_reply(room_id, |reply| RoomCmd::SubmitSeed {
            wallet,
            seat_index,
            seed,
            reply,
        })
        .await
    }

    pub async fn pull_trigger(&self, room_id: &str, wallet: &str) -> GameResult<()> {
        let wallet = wallet.to_string();
        self.with_reply(room_id, |reply| RoomCmd::PullTrigger { wallet, reply })
            .await
    }

    /// Fire-and-forget intents; unknown or concluded rooms are ignored.
    pub fn ready_for_turn(&self, room_id: &str, wallet: &str) {
        if let Some(actor) = self.actor(room_id) {
            let _ = actor.send(RoomCmd::ReadyForTurn {
                wallet: wallet.to_string(),
            });
        }
    }

    pub fn confirm_results_shown(&self, room_id: &str, wallet: &str) {
        if let Some(actor) = self.actor(room_id) {
            let _ = actor.send(RoomCmd::ConfirmResultsShown {
                wallet: wallet.to_string(),
            });
        }
    }

    /// From the deposit monitor: a seat's deposit address holds at least the
    /// seat price. Idempotent at the actor.
    pub fn notify_seat_funded(&self, room_id: &str, seat_index: usize, tx_id: String, amount: u64) {
        if let Some(actor) = self.actor(room_id) {
            let _ = actor.send(RoomCmd::SeatFunded {
                seat_index,
                tx_id,
                amount,
            });
        }
    }

    /// Current snapshot: live rooms answer through their actor (serialized
    /// with mutations), concluded rooms come from the store.
    pub async fn snapshot(&self, room_id: &str) -> GameResult<RoomSnapshot> {
        if let Some(actor) = self.actor(room_id) {
            let (reply_tx, reply_rx) = oneshot::channel();
            if actor.send(RoomCmd::Snapshot { reply: reply_tx }).is_ok() {
                if let Ok(snapshot) = reply_rx.await {
                    return Ok(snapshot);
                }
            }
        }
        self.store
            .load_room(room_id)
            .await?
            .map(|room| room.snapshot())
            .ok_or_else(|| GameError::validation("unknown room"))
    }

    /// Rooms still accepting players or funding, for the listing endpoint.
    pub async fn open_rooms(&self) -> GameResult<Vec<RoomSnapshot>> {
        let rooms = self
            .store
            .rooms_in_states(&[RoomState::Lobby, RoomState::Funding])
            .await?;
        Ok(rooms.iter().map(Room::snapshot).collect())
    }

    /// LOBBY/FUNDING rooms as persisted; the deposit monitor scans these.
    pub async fn funding_rooms(&self) -> GameResult<Vec<Room>> {
        self.store
            .rooms_in_states(&[RoomState::Lobby, RoomState::Funding])
            .await
    }
}
