//! # Realtime Hub
//!
//! ## Purpose
//! The bidirectional client connection layer:
//! - one read task and one buffered write task per WebSocket
//! - first-message wallet binding; a connection can never re-home to a
//!   different wallet, and every authorization uses the bound wallet rather
//!   than anything payload-supplied
//! - room subscriptions with ordered fan-out: a single pump drains the room
//!   event channel, so every subscriber of a room observes the same event
//!   sequence
//! - a 1 Hz snapshot tick per subscribed room on top of the immediate
//!   event-driven pushes, so reconnecting clients converge quickly
//! - a distinct-bound-wallet count broadcast on every connect, bind and
//!   disconnect
//! - per-IP connection caps and per-connection token-bucket message limits;
//!   violations close with code 1008
//!
//! The socket tasks are a thin transport: all protocol logic lives in
//! `register_connection` / `process_frame` / `unregister_connection`, which
//! the test suite drives directly without sockets.

pub mod rate_limit;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use dashmap::DashMap;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{GameError, GameResult};
use crate::game::{QueueManager, RoomAssignment, RoomEvent, RoomManager};
use crate::models::{ClientFrame, ServerEvent, CLOSE_POLICY_VIOLATION, SOMPI_PER_KAS};
use self::rate_limit::TokenBucket;

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<Message>,
    wallet: Option<String>,
    subscriptions: HashSet<String>,
    ip: IpAddr,
}

pub struct RealtimeHub {
    rooms: Arc<RoomManager>,
    queue: Arc<QueueManager>,
    settings: Arc<Settings>,
    cancel: CancellationToken,
    connections: DashMap<Uuid, ConnectionEntry>,
    room_subs: DashMap<String, HashSet<Uuid>>,
    /// Refcount per bound wallet; its size is the unique-user count.
    wallet_refs: Mutex<HashMap<String, usize>>,
    ip_refs: Mutex<HashMap<IpAddr, usize>>,
}

impl RealtimeHub {
    pub fn new(
        rooms: Arc<RoomManager>,
        queue: Arc<QueueManager>,
        settings: Arc<Settings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rooms,
            queue,
            settings,
            cancel,
            connections: DashMap::new(),
            room_subs: DashMap::new(),
            wallet_refs: Mutex::new(HashMap::new()),
            ip_refs: Mutex::new(HashMap::new()),
        }
    }

    /// Drives one WebSocket for its whole life.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, ip: IpAddr) {
        let (mut sender, mut receiver) = socket.split();
        let (conn_id, mut outbound) = match self.register_connection(ip) {
            Ok(pair) => pair,
            Err(_) => {
                tracing::warn!(%ip, "connection refused, per-ip limit reached");
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_POLICY_VIOLATION,
                        reason: "connection limit".into(),
                    })))
                    .await;
                return;
            }
        };
        tracing::debug!(%conn_id, %ip, "websocket connected");

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sender.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let mut limiter = TokenBucket::new(
            self.settings.messages_per_second,
            self.settings.message_burst,
        );
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if !limiter.allow() {
                        tracing::warn!(%conn_id, "message rate limit exceeded");
                        self.send_raw(
                            conn_id,
                            Message::Close(Some(CloseFrame {
                                code: CLOSE_POLICY_VIOLATION,
                                reason: "rate limit".into(),
                            })),
                        );
                        break;
                    }
                    self.process_frame(conn_id, text.as_str()).await;
                }
                Message::Ping(data) => self.send_raw(conn_id, Message::Pong(data)),
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.unregister_connection(conn_id);
        writer.abort();
        tracing::debug!(%conn_id, "websocket disconnected");
    }

    /// Registers a connection, enforcing the per-IP cap. Returns the
    /// connection id and the outbound message stream.
    pub fn register_connection(
        &self,
        ip: IpAddr,
    ) -> GameResult<(Uuid, mpsc::UnboundedReceiver<Message>)> {
        {
            let mut ips = self.ip_refs.lock().expect("ip refcounts poisoned");
            let count = ips.entry(ip).or_insert(0);
            if *count >= self.settings.max_connections_per_ip {
                return Err(GameError::validation("too many connections from this address"));
            }
            *count += 1;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                tx,
                wallet: None,
                subscriptions: HashSet::new(),
                ip,
            },
        );
        self.broadcast_user_count();
        Ok((conn_id, rx))
    }

    /// Tears down a connection: subscriptions, wallet binding, IP refcount.
    pub fn unregister_connection(&self, conn_id: Uuid) {
        let Some((_, entry)) = self.connections.remove(&conn_id) else {
            return;
        };
        for room_id in &entry.subscriptions {
            if let Some(mut subs) = self.room_subs.get_mut(room_id) {
                subs.remove(&conn_id);
            }
        }
        if let Some(wallet) = entry.wallet {
            self.release_wallet(&wallet);
        }
        let mut ips = self.ip_refs.lock().expect("ip refcounts poisoned");
        if let Some(count) = ips.get_mut(&entry.ip) {
            *count -= 1;
            if *count == 0 {
                ips.remove(&entry.ip);
            }
        }
        drop(ips);
        self.broadcast_user_count();
    }

    /// Parses and executes one inbound frame.
    pub async fn process_frame(&self, conn_id: Uuid, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.send_event(
                    conn_id,
                    &ServerEvent::error("validation", format!("malformed frame: {e}")),
                );
                return;
            }
        };

        // first wallet-bearing message binds the connection; any later
        // message claiming a different wallet is rejected without mutation
        if let Some(claim) = frame.wallet_claim().map(str::to_string) {
            let bound = self.bound_wallet(conn_id);
            match bound {
                None => self.bind_wallet(conn_id, &claim),
                Some(ref bound) if *bound != claim => {
                    tracing::warn!(%conn_id, bound = %bound, claim = %claim, "wallet rebinding attempt");
                    self.send_event(
                        conn_id,
                        &ServerEvent::error(
                            "validation",
                            "connection is bound to a different wallet",
                        ),
                    );
                    return;
                }
                Some(_) => {}
            }
        }

        self.dispatch(conn_id, frame).await;
    }

    async fn dispatch(&self, conn_id: Uuid, frame: ClientFrame) {
        match frame {
            ClientFrame::JoinRoom { room_id, .. } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                match self.rooms.join_room(&room_id, &wallet).await {
                    Ok(_) => {
                        self.subscribe(conn_id, &room_id);
                        self.push_snapshot(conn_id, &room_id).await;
                    }
                    Err(e) => self.send_game_error(conn_id, &e),
                }
            }
            ClientFrame::SubscribeRoom { room_id, .. } => match self.rooms.snapshot(&room_id).await
            {
                Ok(snapshot) => {
                    self.subscribe(conn_id, &room_id);
                    self.send_event(conn_id, &ServerEvent::RoomUpdate(snapshot));
                }
                Err(e) => self.send_game_error(conn_id, &e),
            },
            ClientFrame::LeaveRoom { room_id } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                match self.rooms.leave_room(&room_id, &wallet).await {
                    Ok(_) => self.unsubscribe(conn_id, &room_id),
                    Err(e) => self.send_game_error(conn_id, &e),
                }
            }
            ClientFrame::JoinQueue {
                mode, seat_price, ..
            } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                let price_sompi = seat_price.saturating_mul(SOMPI_PER_KAS);
                match self.queue.join(&wallet, mode, price_sompi).await {
                    Ok(waiting) => {
                        self.send_event(
                            conn_id,
                            &ServerEvent::QueueJoined {
                                mode,
                                seat_price,
                                waiting,
                            },
                        );
                        self.broadcast(&ServerEvent::QueueUpdate {
                            mode,
                            seat_price,
                            waiting,
                        });
                    }
                    Err(e) => self.send_game_error(conn_id, &e),
                }
            }
            ClientFrame::LeaveQueue {} => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                if let Some((mode, price_sompi, waiting)) = self.queue.leave(&wallet).await {
                    self.send_event(conn_id, &ServerEvent::QueueLeft);
                    self.broadcast(&ServerEvent::QueueUpdate {
                        mode,
                        seat_price: price_sompi / SOMPI_PER_KAS,
                        waiting,
                    });
                } else {
                    self.send_event(conn_id, &ServerEvent::QueueLeft);
                }
            }
            ClientFrame::SubmitClientSeed {
                room_id,
                seat_index,
                client_seed,
                ..
            } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                if let Err(e) = self
                    .rooms
                    .submit_seed(&room_id, &wallet, seat_index, &client_seed)
                    .await
                {
                    self.send_game_error(conn_id, &e);
                }
            }
            ClientFrame::ReadyForTurn { room_id, .. } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                self.rooms.ready_for_turn(&room_id, &wallet);
            }
            ClientFrame::PullTrigger { room_id } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                if let Err(e) = self.rooms.pull_trigger(&room_id, &wallet).await {
                    self.send_game_error(conn_id, &e);
                }
            }
            ClientFrame::ConfirmResultsShown { room_id } => {
                let Some(wallet) = self.require_wallet(conn_id) else { return };
                self.rooms.confirm_results_shown(&room_id, &wallet);
            }
        }
    }

    /// Fans room events out to subscribers, preserving per-room order.
    pub fn spawn_event_pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
        let hub = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = hub.cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(RoomEvent { room_id, event }) => hub.send_to_room(&room_id, &event),
                        None => break,
                    }
                }
            }
        });
    }

    /// Pushes `room:assigned` to every connection bound to a matched wallet
    /// and subscribes it to the new room.
    pub fn spawn_assignment_pump(
        self: Arc<Self>,
        mut assignments: mpsc::UnboundedReceiver<RoomAssignment>,
    ) {
        let hub = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = hub.cancel.cancelled() => break,
                    assignment = assignments.recv() => match assignment {
                        Some(assignment) => hub.deliver_assignment(&assignment),
                        None => break,
                    }
                }
            }
        });
    }

    /// The periodic full-state fan-out: every subscribed room, once a second.
    pub fn spawn_broadcast_tick(self: Arc<Self>) {
        let hub = self;
        tokio::spawn(async move {
            let interval = Duration::from_secs(1);
            loop {
                tokio::select! {
                    _ = hub.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => hub.broadcast_snapshots().await,
                }
            }
        });
    }

    pub fn deliver_assignment(&self, assignment: &RoomAssignment) {
        let targets: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| {
                entry
                    .wallet
                    .as_deref()
                    .map(|w| assignment.wallets.iter().any(|a| a == w))
                    .unwrap_or(false)
            })
            .map(|entry| *entry.key())
            .collect();
        for conn_id in targets {
            self.subscribe(conn_id, &assignment.room_id);
            self.send_event(
                conn_id,
                &ServerEvent::RoomAssigned {
                    room_id: assignment.room_id.clone(),
                },
            );
        }
    }

    async fn broadcast_snapshots(&self) {
        let rooms: Vec<String> = self
            .room_subs
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        for room_id in rooms {
            if let Ok(snapshot) = self.rooms.snapshot(&room_id).await {
                self.send_to_room(&room_id, &ServerEvent::RoomUpdate(snapshot));
            }
        }
    }

    pub fn subscribe(&self, conn_id: Uuid, room_id: &str) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.subscriptions.insert(room_id.to_string());
        }
        self.room_subs
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    fn unsubscribe(&self, conn_id: Uuid, room_id: &str) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.subscriptions.remove(room_id);
        }
        if let Some(mut subs) = self.room_subs.get_mut(room_id) {
            subs.remove(&conn_id);
        }
    }

    async fn push_snapshot(&self, conn_id: Uuid, room_id: &str) {
        if let Ok(snapshot) = self.rooms.snapshot(room_id).await {
            self.send_event(conn_id, &ServerEvent::RoomUpdate(snapshot));
        }
    }

    fn bind_wallet(&self, conn_id: Uuid, wallet: &str) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.wallet = Some(wallet.to_string());
        }
        let mut wallets = self.wallet_refs.lock().expect("wallet refcounts poisoned");
        *wallets.entry(wallet.to_string()).or_insert(0) += 1;
        drop(wallets);
        tracing::debug!(%conn_id, wallet, "connection bound");
        self.broadcast_user_count();
    }

    fn release_wallet(&self, wallet: &str) {
        let mut wallets = self.wallet_refs.lock().expect("wallet refcounts poisoned");
        if let Some(count) = wallets.get_mut(wallet) {
            *count -= 1;
            if *count == 0 {
                wallets.remove(wallet);
            }
        }
    }

    pub fn bound_wallet(&self, conn_id: Uuid) -> Option<String> {
        self.connections
            .get(&conn_id)
            .and_then(|entry| entry.wallet.clone())
    }

    fn require_wallet(&self, conn_id: Uuid) -> Option<String> {
        let wallet = self.bound_wallet(conn_id);
        if wallet.is_none() {
            self.send_event(
                conn_id,
                &ServerEvent::error("validation", "identify with a wallet first"),
            );
        }
        wallet
    }

    /// Distinct bound wallets across all connections; multiple tabs of one
    /// wallet count once.
    pub fn unique_wallet_count(&self) -> usize {
        self.wallet_refs
            .lock()
            .expect("wallet refcounts poisoned")
            .len()
    }

    fn broadcast_user_count(&self) {
        self.broadcast(&ServerEvent::ConnectionCount {
            count: self.unique_wallet_count(),
        });
    }

    fn broadcast(&self, event: &ServerEvent) {
        let text = event.to_json();
        for entry in self.connections.iter() {
            let _ = entry.tx.send(Message::Text(text.clone().into()));
        }
    }

    fn send_to_room(&self, room_id: &str, event: &ServerEvent) {
        let Some(subs) = self.room_subs.get(room_id) else {
            return;
        };
        let targets: Vec<Uuid> = subs.iter().copied().collect();
        drop(subs);
        let text = event.to_json();
        for conn_id in targets {
            if let Some(entry) = self.connections.get(&conn_id) {
                let _ = entry.tx.send(Message::Text(text.clone().into()));
            }
        }
    }

    fn send_event(&self, conn_id: Uuid, event: &ServerEvent) {
        self.send_raw(conn_id, Message::Text(event.to_json().into()));
    }

    /// Validation and state errors go back to the originating client;
    /// transient and internal failures are absorbed and logged.
    fn send_game_error(&self, conn_id: Uuid, error: &GameError) {
        if error.is_client_fault() {
            self.send_event(conn_id, &ServerEvent::error(error.code(), error.to_string()));
        } else {
            tracing::warn!(%conn_id, error = %error, "request failed server-side");
        }
    }

    fn send_raw(&self, conn_id: Uuid, msg: Message) {
        if let Some(entry) = self.connections.get(&conn_id) {
            let _ = entry.tx.send(msg);
        }
    }
}
