//! # Wire Frames
//!
//! ## Purpose
//! Typed schema for the WebSocket protocol. Both directions use JSON objects
//! of the shape `{event, payload}`; inbound frames deserialize into the
//! `ClientFrame` tagged union so malformed payloads are rejected before any
//! handler runs, and outbound frames serialize from `ServerEvent`.
//!
//! Authorization never trusts payload-supplied wallets: frames carry a wallet
//! only so the hub can bind a fresh connection; after binding, the bound
//! wallet is the identity for every action.

use serde::{Deserialize, Serialize};

use crate::models::room::{GameMode, Round, RoomSnapshot};

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Close code for policy violations (rate limiting).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Client-to-server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientFrame {
    JoinRoom {
        room_id: String,
        wallet_address: String,
    },
    /// Subscribe without joining; used after a reconnect.
    SubscribeRoom {
        room_id: String,
        wallet_address: String,
    },
    LeaveRoom {
        room_id: String,
    },
    JoinQueue {
        mode: GameMode,
        /// Stake in whole KAS, as shown to the player.
        seat_price: u64,
        wallet_address: String,
    },
    /// Fieldless, so an empty `payload` object still parses.
    LeaveQueue {},
    SubmitClientSeed {
        room_id: String,
        seat_index: usize,
        client_seed: String,
        /// Optional; when present it must match the bound wallet.
        #[serde(default)]
        wallet_address: Option<String>,
        /// Wallet signature over `"<roomId>|<seatIndex>|<walletAddress>"`.
        #[serde(default)]
        signature: Option<String>,
    },
    ReadyForTurn {
        room_id: String,
        #[serde(default)]
        turn_id: Option<u64>,
    },
    PullTrigger {
        room_id: String,
    },
    ConfirmResultsShown {
        room_id: String,
    },
}

impl ClientFrame {
    /// The wallet the frame claims to act for, if it carries one. Used only
    /// for first-message binding and rebind detection.
    pub fn wallet_claim(&self) -> Option<&str> {
        match self {
            ClientFrame::JoinRoom { wallet_address, .. }
            | ClientFrame::SubscribeRoom { wallet_address, .. }
            | ClientFrame::JoinQueue { wallet_address, .. } => Some(wallet_address.as_str()),
            ClientFrame::SubmitClientSeed { wallet_address, .. } => wallet_address.as_deref(),
            _ => None,
        }
    }
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "room:update")]
    RoomUpdate(RoomSnapshot),
    #[serde(rename = "room:assigned")]
    RoomAssigned { room_id: String },
    #[serde(rename = "game:start")]
    GameStart {
        room_id: String,
        turn_order: Vec<usize>,
    },
    #[serde(rename = "turn:start")]
    TurnStart {
        room_id: String,
        seat_index: usize,
        turn_id: u64,
    },
    #[serde(rename = "turn:timer_start")]
    TurnTimerStart {
        room_id: String,
        turn_id: u64,
        /// Absolute unix-millisecond deadline.
        deadline: u64,
        timeout_seconds: u64,
    },
    #[serde(rename = "round:result")]
    RoundResult { room_id: String, round: Round },
    #[serde(rename = "game:end")]
    GameEnd {
        room_id: String,
        survivors: Vec<usize>,
    },
    #[serde(rename = "payout:sent")]
    PayoutSent { room_id: String, tx_id: String },
    #[serde(rename = "rng:reveal")]
    RngReveal {
        room_id: String,
        server_seed: String,
        server_commit: String,
    },
    #[serde(rename = "queue:joined")]
    QueueJoined {
        mode: GameMode,
        seat_price: u64,
        waiting: usize,
    },
    #[serde(rename = "queue:left")]
    QueueLeft,
    #[serde(rename = "queue:update")]
    QueueUpdate {
        mode: GameMode,
        seat_price: u64,
        waiting: usize,
    },
    #[serde(rename = "connection:count")]
    ConnectionCount { count: usize },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Serialized frame text; infallible for our own types.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","payload":{"code":"invariant","message":"serialization"}}"#.into()
        })
    }
}
