//! # Room Aggregate
//!
//! ## Purpose
//! Domain types for the elimination game: `Room` (aggregate root), its owned
//! `Seat`s and append-only `Round` log, plus the lifecycle enums. A room
//! exclusively owns its seats and rounds; their lifetimes equal the room's.
//!
//! ## Invariants enforced here
//! - the seat vector never changes length after creation
//! - a wallet occupies at most one seat per room
//! - seat confirmation is monotonic and requires `amount >= seat_price`
//! - round indices are gap-free and strictly increasing
//! - terminal rooms only mutate monitoring metadata (payout/refund tx ids)
//!
//! Mutating helpers return `GameError::Invariant` instead of applying a
//! transition that would break one of these.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, GameResult};
use crate::utils::now_millis;

/// Integer base unit of KAS; 1 KAS = 100,000,000 sompi.
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Room ids are opaque strings, at most 32 characters.
pub const MAX_ROOM_ID_LEN: usize = 32;

/// Sentinel recorded when the payout transaction failed terminally.
pub const PAYOUT_FAILED: &str = "payout_failed";

/// Chambers in one cylinder; the REGULAR round budget is one cylinder per seat.
pub const CHAMBERS_PER_CYLINDER: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Regular,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    Lobby,
    Funding,
    Locked,
    Playing,
    Settled,
    Aborted,
}

impl RoomState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomState::Settled | RoomState::Aborted)
    }

    /// States in which seats may still be taken or vacated.
    pub fn accepts_joins(&self) -> bool {
        matches!(self, RoomState::Lobby | RoomState::Funding)
    }
}

/// One seat of a room, keyed by `(room_id, index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub index: usize,
    /// Payer's address; set when a player joins, immutable for that seat.
    pub wallet_address: Option<String>,
    /// Derived deposit address, unique to this room and seat.
    pub deposit_address: String,
    pub deposit_tx_id: Option<String>,
    /// Observed deposit amount in sompi.
    pub amount: u64,
    pub confirmed: bool,
    /// Confirmation time; also determines turn order.
    pub confirmed_at: Option<u64>,
    /// Lowercase hex seed the player contributed to the round randomness.
    pub client_seed: Option<String>,
    pub alive: bool,
}

impl Seat {
    fn empty(index: usize, deposit_address: String) -> Self {
        Self {
            index,
            wallet_address: None,
            deposit_address,
            deposit_tx_id: None,
            amount: 0,
            confirmed: false,
            confirmed_at: None,
            client_seed: None,
            alive: true,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.wallet_address.is_some()
    }
}

/// Append-only per-room round log entry. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub index: usize,
    pub shooter_seat_index: usize,
    /// Equals the shooter in every covered mode; kept for future variants.
    pub target_seat_index: usize,
    pub died: bool,
    /// Hex HMAC output, stored verbatim for third-party verification.
    pub randomness: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub mode: GameMode,
    pub state: RoomState,
    /// Stake per seat in sompi.
    pub seat_price: u64,
    pub max_players: usize,
    pub min_players: usize,
    pub house_cut_percent: u8,
    /// SHA-256 of the server seed, published at creation.
    pub server_commit: String,
    /// Hex server seed. Held privately here; snapshots redact it until the
    /// room reaches a terminal state.
    pub server_seed: String,
    pub lock_height: Option<u64>,
    pub settlement_block_height: Option<u64>,
    pub settlement_block_hash: Option<String>,
    pub current_turn_seat_index: Option<usize>,
    /// Fixed at LOCK: seat indices in ascending `confirmed_at` order, ties
    /// broken by seat index. The shooter advances along this order, wrapping.
    pub turn_order: Vec<usize>,
    /// Monotonic per-room turn counter; clients drop stale timer frames by it.
    pub turn_id: u64,
    /// Absolute deadline of the running turn timer, if one is armed.
    pub turn_deadline: Option<u64>,
    pub payout_tx_id: Option<String>,
    pub refund_tx_ids: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Funding deadline, fixed at creation.
    pub expires_at: u64,
    pub seats: Vec<Seat>,
    pub rounds: Vec<Round>,
}

impl Room {
    /// Creates a room in LOBBY with empty seats and a published commit.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        mode: GameMode,
        seat_price: u64,
        min_players: usize,
        max_players: usize,
        house_cut_percent: u8,
        server_seed: String,
        server_commit: String,
        deposit_addresses: Vec<String>,
        funding_timeout_seconds: u64,
    ) -> GameResult<Self> {
        if id.is_empty() || id.len() > MAX_ROOM_ID_LEN {
            return Err(GameError::invariant(format!(
                "room id must be 1..={MAX_ROOM_ID_LEN} chars"
            )));
        }
        if deposit_addresses.len() != max_players {
            return Err(GameError::invariant(
                "one deposit address per seat is required",
            ));
        }
        let now = now_millis();
        let seats = deposit_addresses
            .into_iter()
            .enumerate()
            .map(|(i, addr)| Seat::empty(i, addr))
            .collect();
        Ok(Self {
            id,
            mode,
            state: RoomState::Lobby,
            seat_price,
            max_players,
            min_players,
            house_cut_percent,
            server_commit,
            server_seed,
            lock_height: None,
            settlement_block_height: None,
            settlement_block_hash: None,
            current_turn_seat_index: None,
            turn_order: Vec::new(),
            turn_id: 0,
            turn_deadline: None,
            payout_tx_id: None,
            refund_tx_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + funding_timeout_seconds * 1000,
            seats,
            rounds: Vec::new(),
        })
    }

    pub fn seat_of_wallet(&self, wallet: &str) -> Option<&Seat> {
        self.seats
            .iter()
            .find(|s| s.wallet_address.as_deref() == Some(wallet))
    }

    pub fn occupied_count(&self) -> usize {
        self.seats.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn confirmed_count(&self) -> usize {
        self.seats.iter().filter(|s| s.confirmed).count()
    }

    /// FUNDING locks only once every seat of the room is confirmed.
    pub fn all_seats_confirmed(&self) -> bool {
        self.seats.iter().all(|s| s.confirmed)
    }

    /// Total pot in sompi. Uses the seat price, not observed amounts, so
    /// over-deposits never inflate the pot.
    pub fn pot(&self) -> u64 {
        self.seat_price * self.confirmed_count() as u64
    }

    /// Seats a wallet on the first empty seat. LOBBY/FUNDING only.
    pub fn take_seat(&mut self, wallet: &str) -> GameResult<usize> {
        if !self.state.accepts_joins() {
            return Err(GameError::state("room is no longer accepting players"));
        }
        if self.seat_of_wallet(wallet).is_some() {
            return Err(GameError::state("wallet already holds a seat in this room"));
        }
        let seat = self
            .seats
            .iter_mut()
            .find(|s| !s.is_occupied())
            .ok_or_else(|| GameError::state("room is full"))?;
        seat.wallet_address = Some(wallet.to_string());
        let index = seat.index;
        self.touch();
        Ok(index)
    }

    /// Vacates an unconfirmed seat. Confirmed seats stay until refund/payout.
    pub fn vacate_seat(&mut self, wallet: &str) -> GameResult<usize> {
        if !self.state.accepts_joins() {
            return Err(GameError::state("seats cannot be left in this state"));
        }
        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.wallet_address.as_deref() == Some(wallet))
            .ok_or_else(|| GameError::state("wallet holds no seat in this room"))?;
        if seat.confirmed {
            return Err(GameError::state("a confirmed seat cannot be vacated"));
        }
        seat.wallet_address = None;
        seat.client_seed = None;
        let index = seat.index;
        self.touch();
        Ok(index)
    }

    /// Marks a seat confirmed. Returns false when the seat was already
    /// confirmed (the monitor is idempotent). Amounts below the seat price
    /// never confirm.
    pub fn confirm_seat(
        &mut self,
        index: usize,
        tx_id: String,
        amount: u64,
    ) -> GameResult<bool> {
        let seat_price = self.seat_price;
        let seat = self
            .seats
            .get_mut(index)
            .ok_or_else(|| GameError::invariant(format!("no seat at index {index}")))?;
        if seat.confirmed {
            return Ok(false);
        }
        if !seat.is_occupied() {
            return Err(GameError::invariant(format!(
                "deposit observed on unoccupied seat {index}"
            )));
        }
        if amount < seat_price {
            return Err(GameError::invariant(format!(
                "confirming seat {index} with {amount} sompi below the seat price"
            )));
        }
        seat.confirmed = true;
        seat.confirmed_at = Some(now_millis());
        seat.deposit_tx_id = Some(tx_id);
        seat.amount = amount;
        self.touch();
        Ok(true)
    }

    /// Records a client seed on the wallet's own seat. Hex, lowercased.
    pub fn submit_client_seed(
        &mut self,
        wallet: &str,
        seat_index: usize,
        seed: &str,
    ) -> GameResult<()> {
        if self.state == RoomState::Playing || self.state.is_terminal() {
            return Err(GameError::state("client seeds are fixed once play begins"));
        }
        let seed = seed.to_ascii_lowercase();
        if seed.is_empty() || seed.len() > 128 || !seed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GameError::validation("client seed must be 1..=128 hex chars"));
        }
        let seat = self
            .seats
            .get_mut(seat_index)
            .ok_or_else(|| GameError::validation(format!("no seat at index {seat_index}")))?;
        if seat.wallet_address.as_deref() != Some(wallet) {
            return Err(GameError::validation("seat does not belong to this wallet"));
        }
        seat.client_seed = Some(seed);
        self.touch();
        Ok(())
    }

    /// Submitted client seeds, lowercased and lexicographically sorted, the
    /// exact sequence fed into the round HMAC.
    pub fn sorted_client_seeds(&self) -> Vec<String> {
        let mut seeds: Vec<String> = self
            .seats
            .iter()
            .filter_map(|s| s.client_seed.clone())
            .collect();
        seeds.sort();
        seeds
    }

    /// Fixes the turn order: ascending `confirmed_at`, ties by seat index.
    pub fn compute_turn_order(&self) -> Vec<usize> {
        let mut order: Vec<&Seat> = self.seats.iter().filter(|s| s.confirmed).collect();
        order.sort_by_key(|s| (s.confirmed_at.unwrap_or(u64::MAX), s.index));
        order.into_iter().map(|s| s.index).collect()
    }

    /// Alive seat indices in fixed turn order.
    pub fn alive_in_order(&self) -> Vec<usize> {
        self.turn_order
            .iter()
            .copied()
            .filter(|&i| self.seats[i].alive)
            .collect()
    }

    /// Next alive seat after `from` in the fixed order, wrapping.
    pub fn next_alive_after(&self, from: usize) -> Option<usize> {
        let pos = self.turn_order.iter().position(|&i| i == from)?;
        let n = self.turn_order.len();
        (1..=n)
            .map(|step| self.turn_order[(pos + step) % n])
            .find(|&i| self.seats[i].alive)
    }

    /// Appends a round, enforcing the gap-free strictly increasing index law.
    pub fn append_round(&mut self, round: Round) -> GameResult<()> {
        if round.index != self.rounds.len() {
            return Err(GameError::invariant(format!(
                "round index {} does not extend a log of length {}",
                round.index,
                self.rounds.len()
            )));
        }
        self.rounds.push(round);
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Wire snapshot. The server seed appears only once the room is terminal,
    /// keeping the commit binding until reveal.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            mode: self.mode,
            state: self.state,
            seat_price: self.seat_price,
            max_players: self.max_players,
            min_players: self.min_players,
            house_cut_percent: self.house_cut_percent,
            server_commit: self.server_commit.clone(),
            server_seed: self
                .state
                .is_terminal()
                .then(|| self.server_seed.clone()),
            lock_height: self.lock_height,
            settlement_block_height: self.settlement_block_height,
            settlement_block_hash: self.settlement_block_hash.clone(),
            current_turn_seat_index: self.current_turn_seat_index,
            turn_order: self.turn_order.clone(),
            turn_id: self.turn_id,
            payout_tx_id: self.payout_tx_id.clone(),
            refund_tx_ids: self.refund_tx_ids.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            seats: self.seats.clone(),
            rounds: self.rounds.clone(),
        }
    }
}

/// Complete room state as broadcast in `room:update` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: String,
    pub mode: GameMode,
    pub state: RoomState,
    pub seat_price: u64,
    pub max_players: usize,
    pub min_players: usize,
    pub house_cut_percent: u8,
    pub server_commit: String,
    /// Revealed only in SETTLED or ABORTED.
    pub server_seed: Option<String>,
    pub lock_height: Option<u64>,
    pub settlement_block_height: Option<u64>,
    pub settlement_block_hash: Option<String>,
    pub current_turn_seat_index: Option<usize>,
    pub turn_order: Vec<usize>,
    pub turn_id: u64,
    pub payout_tx_id: Option<String>,
    pub refund_tx_ids: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub expires_at: u64,
    pub seats: Vec<Seat>,
    pub rounds: Vec<Round>,
}
