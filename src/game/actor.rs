//! # Room Actor
//!
//! ## Purpose
//! One task per active room; the only code that mutates a `Room`. The loop
//! multiplexes the command queue against the room's next absolute deadline:
//!
//! - LOBBY/FUNDING: funding expiry, plus a lock retry poll once every seat
//!   is confirmed but the chain tip could not be fetched yet
//! - LOCKED: settlement poll until the DAA score reaches the settlement
//!   height and a tip hash is captured
//! - PLAYING: the pre-turn grace wait, then the turn timer; expiry forces
//!   the pull with the same randomness a voluntary pull would use
//! - ended: the results grace wait before the payout is released
//!
//! Deadlines are absolute unix-millisecond timestamps; the turn deadline is
//! persisted on the room, so a restart re-arms it and a deadline already in
//! the past fires immediately. Every mutation is persisted before its event
//! is emitted, and events are enqueued to the hub without ever waiting on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{GameError, GameResult};
use crate::game::payout::{payout_plan, refund_plan};
use crate::game::rooms::{RoomCmd, RoomEvent};
use crate::models::{
    Room, RoomState, Round, ServerEvent, CHAMBERS_PER_CYLINDER, GameMode, PAYOUT_FAILED,
};
use crate::rng;
use crate::services::{ChainWatcher, RoomStore, WalletGateway};
use crate::utils::now_millis;

/// Interval between chain polls while waiting to lock or settle.
const CHAIN_POLL_MS: u64 = 1000;

pub(crate) struct ActorContext {
    pub store: Arc<dyn RoomStore>,
    pub chain: Arc<ChainWatcher>,
    pub wallet: Arc<WalletGateway>,
    pub settings: Arc<Settings>,
    pub events: mpsc::UnboundedSender<RoomEvent>,
    pub cancel: CancellationToken,
}

/// Where the current turn stands, between persisted transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    /// Not playing, or a refused transition left the room parked.
    Idle,
    /// `turn:start` emitted, waiting (bounded) for `ready_for_turn`.
    AwaitReady { deadline: u64 },
    /// Timer armed; waiting for the pull or the deadline.
    AwaitPull,
    /// Play over, waiting (bounded) for `confirm_results_shown`.
    Ended { deadline: u64 },
}

#[derive(Debug, Clone, Copy)]
enum Deadline {
    Expiry,
    ChainPoll,
    PreTurnGrace,
    TurnTimer,
    ResultsGrace,
}

pub(crate) struct RoomActor {
    room: Room,
    rx: mpsc::UnboundedReceiver<RoomCmd>,
    ctx: ActorContext,
    phase: TurnPhase,
    /// Next lock/settlement chain poll, when one is scheduled.
    poll_at: Option<u64>,
    done: bool,
}

impl RoomActor {
    pub(crate) fn new(
        room: Room,
        rx: mpsc::UnboundedReceiver<RoomCmd>,
        ctx: ActorContext,
    ) -> Self {
        Self {
            room,
            rx,
            ctx,
            phase: TurnPhase::Idle,
            poll_at: None,
            done: false,
        }
    }

    pub(crate) async fn run(mut self) {
        self.recover().await;
        while !self.done {
            let next = self.next_deadline();
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    self.persist().await;
                    break;
                }
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd).await,
                    None => break,
                },
                _ = sleep_until_ms(next.map(|(at, _)| at)), if next.is_some() => {
                    if let Some((_, kind)) = next {
                        self.handle_deadline(kind).await;
                    }
                }
            }
        }
        tracing::debug!(room = %self.room.id, state = ?self.room.state, "room actor stopped");
    }

    /// Startup reconciliation: fire anything that should have happened while
    /// the process was down.
    async fn recover(&mut self) {
        match self.room.state {
            RoomState::Lobby | RoomState::Funding => {
                if self.room.all_seats_confirmed() {
                    self.try_lock().await;
                } else if now_millis() > self.room.expires_at {
                    self.abort("funding window expired").await;
                }
            }
            RoomState::Locked => {
                // poll immediately; the settlement block may already exist
                self.poll_at = Some(now_millis());
            }
            RoomState::Playing => {
                if self.room.current_turn_seat_index.is_none() {
                    self.emit_invariant("playing room without a current shooter");
                    return;
                }
                match self.room.turn_deadline {
                    // timer was armed before shutdown; past deadlines force
                    // the pull right away
                    Some(_) => self.phase = TurnPhase::AwaitPull,
                    None => self.begin_turn().await,
                }
            }
            RoomState::Settled | RoomState::Aborted => self.done = true,
        }
    }

    fn next_deadline(&self) -> Option<(u64, Deadline)> {
        let mut candidates: Vec<(u64, Deadline)> = Vec::new();
        match self.room.state {
            RoomState::Lobby | RoomState::Funding => {
                // once every seat is funded the expiry is moot; only the
                // lock retry poll remains, so a chain outage cannot spin
                if !self.room.all_seats_confirmed() {
                    candidates.push((self.room.expires_at, Deadline::Expiry));
                }
                if let Some(at) = self.poll_at {
                    candidates.push((at, Deadline::ChainPoll));
                }
            }
            RoomState::Locked => {
                if let Some(at) = self.poll_at {
                    candidates.push((at, Deadline::ChainPoll));
                }
            }
            RoomState::Playing => match self.phase {
                TurnPhase::AwaitReady { deadline } => {
                    candidates.push((deadline, Deadline::PreTurnGrace))
                }
                TurnPhase::AwaitPull => {
                    if let Some(at) = self.room.turn_deadline {
                        candidates.push((at, Deadline::TurnTimer));
                    }
                }
                TurnPhase::Ended { deadline } => {
                    candidates.push((deadline, Deadline::ResultsGrace))
                }
                TurnPhase::Idle => {}
            },
            RoomState::Settled | RoomState::Aborted => {}
        }
        candidates.into_iter().min_by_key(|(at, _)| *at)
    }

    async fn handle_deadline(&mut self, kind: Deadline) {
        match kind {
            Deadline::Expiry => {
                if self.room.all_seats_confirmed() {
                    // funds are in; a slow chain must not forfeit them
                    self.try_lock().await;
                } else {
                    self.abort("funding window expired").await;
                }
            }
            Deadline::ChainPoll => match self.room.state {
                RoomState::Lobby | RoomState::Funding => self.try_lock().await,
                RoomState::Locked => self.try_start_playing().await,
                _ => self.poll_at = None,
            },
            Deadline::PreTurnGrace => self.start_turn_timer().await,
            Deadline::TurnTimer => {
                tracing::info!(
                    room = %self.room.id,
                    seat = ?self.room.current_turn_seat_index,
                    "turn timer expired, forcing the pull"
                );
                self.resolve_pull().await;
            }
            Deadline::ResultsGrace => self.settle().await,
        }
    }

    async fn handle_cmd(&mut self, cmd: RoomCmd) {
        match cmd {
            RoomCmd::Join { wallet, reply } => {
                let result = self.join(&wallet).await;
                let _ = reply.send(result);
            }
            RoomCmd::Leave { wallet, reply } => {
                let result = self.leave(&wallet).await;
                let _ = reply.send(result);
            }
            RoomCmd::SubmitSeed {
                wallet,
                seat_index,
                seed,
                reply,
            } => {
                let result = self.submit_seed(&wallet, seat_index, &seed).await;
                let _ = reply.send(result);
            }
            RoomCmd::SeatFunded {
                seat_index,
                tx_id,
                amount,
            } => self.seat_funded(seat_index, tx_id, amount).await,
            RoomCmd::ReadyForTurn { wallet } => self.ready_for_turn(&wallet).await,
            RoomCmd::PullTrigger { wallet, reply } => {
                let result = self.pull_trigger(&wallet).await;
                let _ = reply.send(result);
            }
            RoomCmd::ConfirmResultsShown { wallet } => self.confirm_results(&wallet).await,
            RoomCmd::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
        }
    }

    async fn join(&mut self, wallet: &str) -> GameResult<usize> {
        let index = self.room.take_seat(wallet)?;
        if self.room.state == RoomState::Lobby {
            self.room.state = RoomState::Funding;
        }
        self.persist().await;
        self.emit_update();
        tracing::info!(room = %self.room.id, wallet, seat = index, "player seated");
        Ok(index)
    }

    async fn leave(&mut self, wallet: &str) -> GameResult<usize> {
        let index = self.room.vacate_seat(wallet)?;
        self.persist().await;
        self.emit_update();
        Ok(index)
    }

    async fn submit_seed(&mut self, wallet: &str, seat_index: usize, seed: &str) -> GameResult<()> {
        self.room.submit_client_seed(wallet, seat_index, seed)?;
        self.persist().await;
        self.emit_update();
        Ok(())
    }

    async fn seat_funded(&mut self, seat_index: usize, tx_id: String, amount: u64) {
        if !self.room.state.accepts_joins() {
            return;
        }
        match self.room.confirm_seat(seat_index, tx_id, amount) {
            Ok(true) => {
                tracing::info!(
                    room = %self.room.id,
                    seat = seat_index,
                    amount,
                    "seat deposit confirmed"
                );
                self.persist().await;
                self.emit_update();
                if self.room.all_seats_confirmed() {
                    self.try_lock().await;
                }
            }
            Ok(false) => {} // already confirmed; monitor re-observation
            Err(e) => self.emit_invariant(&e.to_string()),
        }
    }

    /// FUNDING -> LOCKED once every seat is confirmed: records the DAA score
    /// and schedules the settlement block. Chain failures retry on a poll.
    async fn try_lock(&mut self) {
        if !self.room.state.accepts_joins() || !self.room.all_seats_confirmed() {
            return;
        }
        let tip = match self.ctx.chain.current_tip().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(room = %self.room.id, error = %e, "lock deferred, chain unavailable");
                self.poll_at = Some(now_millis() + CHAIN_POLL_MS);
                return;
            }
        };
        self.room.lock_height = Some(tip.virtual_daa_score);
        self.room.settlement_block_height =
            Some(tip.virtual_daa_score + self.ctx.settings.settlement_block_offset);
        self.room.state = RoomState::Locked;
        self.poll_at = Some(now_millis() + CHAIN_POLL_MS);
        self.persist().await;
        self.emit_update();
        tracing::info!(
            room = %self.room.id,
            lock_height = tip.virtual_daa_score,
            settlement_height = ?self.room.settlement_block_height,
            "room locked"
        );
    }

    /// LOCKED -> PLAYING once the settlement block exists: captures its hash,
    /// fixes the turn order and opens the first turn.
    async fn try_start_playing(&mut self) {
        let settlement_height = match self.room.settlement_block_height {
            Some(h) => h,
            None => {
                self.emit_invariant("locked room without a settlement height");
                return;
            }
        };
        let tip = match self.ctx.chain.current_tip().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(room = %self.room.id, error = %e, "settlement poll failed");
                self.poll_at = Some(now_millis() + CHAIN_POLL_MS);
                return;
            }
        };
        if tip.virtual_daa_score < settlement_height || tip.tip_hashes.is_empty() {
            self.poll_at = Some(now_millis() + CHAIN_POLL_MS);
            return;
        }
        self.poll_at = None;
        self.room.settlement_block_hash = Some(tip.tip_hashes[0].clone());

        // the RNG cannot run without client entropy
        if self.room.sorted_client_seeds().is_empty() {
            self.abort("settlement reached without any client seed").await;
            return;
        }

        self.room.turn_order = self.room.compute_turn_order();
        self.room.current_turn_seat_index = self.room.turn_order.first().copied();
        self.room.state = RoomState::Playing;
        self.persist().await;
        self.emit(ServerEvent::GameStart {
            room_id: self.room.id.clone(),
            turn_order: self.room.turn_order.clone(),
        });
        self.emit_update();
        tracing::info!(
            room = %self.room.id,
            order = ?self.room.turn_order,
            block = ?self.room.settlement_block_hash,
            "game started"
        );
        self.begin_turn().await;
    }

    async fn begin_turn(&mut self) {
        let seat_index = match self.room.current_turn_seat_index {
            Some(i) => i,
            None => {
                self.emit_invariant("turn began without a shooter");
                return;
            }
        };
        self.room.turn_id += 1;
        self.room.turn_deadline = None;
        self.phase = TurnPhase::AwaitReady {
            deadline: now_millis() + self.ctx.settings.pre_turn_grace_seconds * 1000,
        };
        self.persist().await;
        self.emit(ServerEvent::TurnStart {
            room_id: self.room.id.clone(),
            seat_index,
            turn_id: self.room.turn_id,
        });
    }

    async fn start_turn_timer(&mut self) {
        let timeout_seconds = self.ctx.settings.turn_timeout_seconds;
        let deadline = now_millis() + timeout_seconds * 1000;
        self.room.turn_deadline = Some(deadline);
        self.phase = TurnPhase::AwaitPull;
        self.persist().await;
        self.emit(ServerEvent::TurnTimerStart {
            room_id: self.room.id.clone(),
            turn_id: self.room.turn_id,
            deadline,
            timeout_seconds,
        });
    }

    async fn ready_for_turn(&mut self, wallet: &str) {
        if self.room.state != RoomState::Playing || !self.is_current_shooter(wallet) {
            return;
        }
        // idempotent: only the first ready of a turn starts the timer
        if matches!(self.phase, TurnPhase::AwaitReady { .. }) {
            self.start_turn_timer().await;
        }
    }

    async fn pull_trigger(&mut self, wallet: &str) -> GameResult<()> {
        if self.room.state != RoomState::Playing {
            return Err(GameError::state("the game is not running"));
        }
        if self.is_current_shooter(wallet) {
            return match self.phase {
                // pulling before the timer is fine; it resolves the turn
                TurnPhase::AwaitReady { .. } | TurnPhase::AwaitPull => {
                    self.resolve_pull().await;
                    Ok(())
                }
                _ => Ok(()), // duplicate pull within the same turn
            };
        }
        // a duplicate pull racing its own resolution is a no-op, anything
        // else is out of turn
        let last_shooter = self
            .room
            .rounds
            .last()
            .map(|r| r.shooter_seat_index)
            .and_then(|i| self.room.seats[i].wallet_address.clone());
        if last_shooter.as_deref() == Some(wallet) {
            return Ok(());
        }
        Err(GameError::state("it is not this wallet's turn"))
    }

    /// The resolve procedure: voluntary pulls and timer expiries both land
    /// here and are indistinguishable in outcome.
    async fn resolve_pull(&mut self) {
        let result = self.resolve_inner().await;
        if let Err(e) = result {
            // refused transition: park the room for operator action
            tracing::error!(
                room = %self.room.id,
                round = self.room.rounds.len(),
                error = %e,
                "round resolution refused"
            );
            self.phase = TurnPhase::Idle;
            self.room.turn_deadline = None;
            self.persist().await;
        }
    }

    async fn resolve_inner(&mut self) -> GameResult<()> {
        let shooter = self
            .room
            .current_turn_seat_index
            .ok_or_else(|| GameError::invariant("resolve without a shooter"))?;
        let alive = self.room.alive_in_order();
        let chambers = alive.len();
        let shooter_pos = alive
            .iter()
            .position(|&i| i == shooter)
            .ok_or_else(|| GameError::invariant("current shooter is not alive"))?;
        let block_hash = self
            .room
            .settlement_block_hash
            .clone()
            .ok_or_else(|| GameError::invariant("resolve without a settlement block"))?;

        let round_index = self.room.rounds.len();
        let randomness = rng::round_randomness(
            &self.room.server_seed,
            &self.room.sorted_client_seeds(),
            &self.room.id,
            round_index,
            &block_hash,
        )?;
        let draw = rng::chamber_draw(&randomness, chambers)?;
        let bullets = rng::bullets_for(self.room.mode, chambers);
        let died = rng::shooter_dies(draw, shooter_pos, chambers, bullets);

        self.room.append_round(Round {
            index: round_index,
            shooter_seat_index: shooter,
            target_seat_index: shooter,
            died,
            randomness,
            timestamp: now_millis(),
        })?;
        if died {
            self.room.seats[shooter].alive = false;
        }
        self.room.turn_deadline = None;
        self.persist().await;
        let round = self.room.rounds[round_index].clone();
        self.emit(ServerEvent::RoundResult {
            room_id: self.room.id.clone(),
            round,
        });
        tracing::info!(
            room = %self.room.id,
            round = round_index,
            seat = shooter,
            died,
            "round resolved"
        );

        let alive_now = self.room.alive_in_order();
        if alive_now.len() < 2 || self.round_budget_exhausted() {
            self.end_play().await;
        } else {
            self.room.current_turn_seat_index = self.room.next_alive_after(shooter);
            self.begin_turn().await;
        }
        Ok(())
    }

    /// REGULAR plays at most one full cylinder per seat; EXTREME always runs
    /// down to a single survivor.
    fn round_budget_exhausted(&self) -> bool {
        match self.room.mode {
            GameMode::Regular => {
                self.room.rounds.len() >= CHAMBERS_PER_CYLINDER * self.room.confirmed_count()
            }
            GameMode::Extreme => false,
        }
    }

    async fn end_play(&mut self) {
        self.room.current_turn_seat_index = None;
        self.room.turn_deadline = None;
        self.phase = TurnPhase::Ended {
            deadline: now_millis() + self.ctx.settings.results_grace_seconds * 1000,
        };
        self.persist().await;
        self.emit(ServerEvent::GameEnd {
            room_id: self.room.id.clone(),
            survivors: self.room.alive_in_order(),
        });
    }

    async fn confirm_results(&mut self, wallet: &str) {
        if self.room.seat_of_wallet(wallet).is_none() {
            return;
        }
        if matches!(self.phase, TurnPhase::Ended { .. }) {
            self.settle().await;
        }
    }

    /// PLAYING -> SETTLED: reveal the seed, then submit the single payout
    /// transaction. A terminal submit failure leaves the sentinel and the
    /// room still settles; funds never move partially.
    async fn settle(&mut self) {
        if self.room.state != RoomState::Playing {
            return;
        }
        self.room.state = RoomState::Settled;
        self.phase = TurnPhase::Idle;
        self.persist().await;
        self.emit(ServerEvent::RngReveal {
            room_id: self.room.id.clone(),
            server_seed: self.room.server_seed.clone(),
            server_commit: self.room.server_commit.clone(),
        });
        self.emit_update();

        match payout_plan(&self.room, &self.ctx.settings.treasury_address) {
            Ok(plan) => {
                tracing::info!(
                    room = %self.room.id,
                    pot = plan.pot,
                    house_cut = plan.house_cut,
                    payees = plan.outputs.len(),
                    "submitting payout"
                );
                match self
                    .ctx
                    .wallet
                    .submit_payout(&self.ctx.chain, &plan.outputs)
                    .await
                {
                    Ok(tx_id) => {
                        self.room.payout_tx_id = Some(tx_id.clone());
                        self.emit(ServerEvent::PayoutSent {
                            room_id: self.room.id.clone(),
                            tx_id,
                        });
                    }
                    Err(e) => {
                        tracing::error!(room = %self.room.id, error = %e, "payout failed terminally");
                        self.room.payout_tx_id = Some(PAYOUT_FAILED.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::error!(room = %self.room.id, error = %e, "payout plan refused");
                self.room.payout_tx_id = Some(PAYOUT_FAILED.to_string());
            }
        }
        self.persist().await;
        self.emit_update();
        self.done = true;
    }

    /// Terminal abort: reveal the seed and refund every confirmed seat its
    /// exact deposited amount.
    async fn abort(&mut self, reason: &str) {
        tracing::info!(room = %self.room.id, reason, "room aborted");
        self.room.state = RoomState::Aborted;
        self.room.current_turn_seat_index = None;
        self.room.turn_deadline = None;
        self.phase = TurnPhase::Idle;
        self.poll_at = None;
        self.persist().await;
        self.emit(ServerEvent::RngReveal {
            room_id: self.room.id.clone(),
            server_seed: self.room.server_seed.clone(),
            server_commit: self.room.server_commit.clone(),
        });

        let refunds = refund_plan(&self.room);
        if !refunds.is_empty() {
            match self
                .ctx
                .wallet
                .submit_refunds(&self.ctx.chain, &refunds)
                .await
            {
                Ok(tx_id) => {
                    tracing::info!(room = %self.room.id, tx = %tx_id, seats = refunds.len(), "refunds submitted");
                    self.room.refund_tx_ids.push(tx_id);
                }
                Err(e) => {
                    tracing::error!(room = %self.room.id, error = %e, "refund submission failed");
                }
            }
        }
        self.persist().await;
        self.emit_update();
        self.done = true;
    }

    fn is_current_shooter(&self, wallet: &str) -> bool {
        self.room
            .current_turn_seat_index
            .and_then(|i| self.room.seats[i].wallet_address.as_deref())
            == Some(wallet)
    }

    async fn persist(&mut self) {
        self.room.touch();
        if let Err(e) = self.ctx.store.upsert_room(&self.room).await {
            tracing::error!(room = %self.room.id, error = %e, "room persistence failed");
        }
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.ctx.events.send(RoomEvent {
            room_id: self.room.id.clone(),
            event,
        });
    }

    fn emit_update(&self) {
        self.emit(ServerEvent::RoomUpdate(self.room.snapshot()));
    }

    fn emit_invariant(&self, message: &str) {
        tracing::error!(
            room = %self.room.id,
            state = ?self.room.state,
            rounds = self.room.rounds.len(),
            message,
            "room invariant violated, transition refused"
        );
    }
}

async fn sleep_until_ms(at: Option<u64>) {
    match at {
        Some(at) => {
            let now = now_millis();
            if at > now {
                tokio::time::sleep(Duration::from_millis(at - now)).await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
