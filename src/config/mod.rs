//! # Runtime Configuration
//!
//! ## Purpose
//! Typed settings for the whole orchestrator, loaded once at startup from the
//! environment (with `.env` support) and passed to components by reference.
//! Monetary values are converted to integer sompi at load time so the rest of
//! the system never does float arithmetic.
//!
//! ## Recognized environment variables
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `NETWORK` | `testnet-10` | `mainnet` or `testnet-10` |
//! | `WALLET_MNEMONIC` | required | hot wallet mnemonic (secret) |
//! | `TREASURY_ADDRESS` | required | receives the house cut |
//! | `HOUSE_CUT_PERCENT` | `5` | 0..=100 |
//! | `PORT` | `8080` | HTTP + WebSocket listener |
//! | `QUICK_MATCH_SEAT_PRICE_KAS` | `10` | quick-match stake |
//! | `QUICK_MATCH_MIN_PLAYERS` / `..MAX_PLAYERS` | `6` / `6` | room cardinality |
//! | `QUICK_MATCH_TIMEOUT_SECONDS` | `60` | funding window |
//! | `CUSTOM_ROOM_MIN_SEAT_PRICE_KAS` / `..MAX..` | `1` / `1000` | custom price bounds |
//! | `CUSTOM_ROOM_MIN_PLAYERS` / `..MAX_PLAYERS` | `2` / `6` | custom cardinality |
//! | `CUSTOM_ROOM_TIMEOUT_SECONDS` | `60` | funding window |
//! | `SETTLEMENT_BLOCK_OFFSET` | `5` | DAA score gap between lock and settlement |
//! | `TURN_TIMEOUT_SECONDS` | `30` | per-turn pull window |

pub mod environment;

pub use environment::{env_or, env_required, load_env};

use serde::{Deserialize, Serialize};

use crate::models::SOMPI_PER_KAS;

/// Target network; selects the address prefix used for derived addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet10,
}

impl Network {
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "kaspa",
            Network::Testnet10 => "kaspatest",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "mainnet" => Some(Network::Mainnet),
            "testnet-10" => Some(Network::Testnet10),
            _ => None,
        }
    }
}

/// Matchmaking and room-shape parameters for one room family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomParams {
    /// Stake per seat, in sompi.
    pub seat_price: u64,
    pub min_players: usize,
    pub max_players: usize,
    /// Funding window before the room aborts.
    pub timeout_seconds: u64,
}

/// Bounds for operator-created custom rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRoomParams {
    pub min_seat_price: u64,
    pub max_seat_price: u64,
    pub min_players: usize,
    pub max_players: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub network: Network,
    pub wallet_mnemonic: String,
    pub treasury_address: String,
    pub house_cut_percent: u8,
    pub port: u16,
    pub quick_match: RoomParams,
    pub custom_room: CustomRoomParams,
    /// DAA score offset between lock and the settlement block.
    pub settlement_block_offset: u64,
    pub turn_timeout_seconds: u64,
    /// Bounded wait for `ready_for_turn` before the timer starts anyway.
    pub pre_turn_grace_seconds: u64,
    /// Bounded wait for `confirm_results_shown` before the payout is released.
    pub results_grace_seconds: u64,
    pub queue_ttl_seconds: u64,
    pub deposit_poll_interval_ms: u64,
    pub payout_max_attempts: u32,
    pub payout_backoff_ms: u64,
    pub max_connections_per_ip: usize,
    /// Inbound message rate limit per connection, tokens per second.
    pub messages_per_second: u32,
    pub message_burst: u32,
}

impl Settings {
    /// Loads settings from the environment. Secrets are required; everything
    /// else falls back to the documented defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let network = Network::parse(&env_or("NETWORK", "testnet-10".to_string()))
            .ok_or_else(|| anyhow::anyhow!("NETWORK must be 'mainnet' or 'testnet-10'"))?;

        let house_cut_percent: u8 = env_or("HOUSE_CUT_PERCENT", 5u8);
        if house_cut_percent > 100 {
            anyhow::bail!("HOUSE_CUT_PERCENT must be between 0 and 100");
        }

        Ok(Self {
            network,
            wallet_mnemonic: env_required("WALLET_MNEMONIC")?,
            treasury_address: env_required("TREASURY_ADDRESS")?,
            house_cut_percent,
            port: env_or("PORT", 8080u16),
            quick_match: RoomParams {
                seat_price: env_or("QUICK_MATCH_SEAT_PRICE_KAS", 10u64) * SOMPI_PER_KAS,
                min_players: env_or("QUICK_MATCH_MIN_PLAYERS", 6usize),
                max_players: env_or("QUICK_MATCH_MAX_PLAYERS", 6usize),
                timeout_seconds: env_or("QUICK_MATCH_TIMEOUT_SECONDS", 60u64),
            },
            custom_room: CustomRoomParams {
                min_seat_price: env_or("CUSTOM_ROOM_MIN_SEAT_PRICE_KAS", 1u64) * SOMPI_PER_KAS,
                max_seat_price: env_or("CUSTOM_ROOM_MAX_SEAT_PRICE_KAS", 1000u64) * SOMPI_PER_KAS,
                min_players: env_or("CUSTOM_ROOM_MIN_PLAYERS", 2usize),
                max_players: env_or("CUSTOM_ROOM_MAX_PLAYERS", 6usize),
                timeout_seconds: env_or("CUSTOM_ROOM_TIMEOUT_SECONDS", 60u64),
            },
            settlement_block_offset: env_or("SETTLEMENT_BLOCK_OFFSET", 5u64),
            turn_timeout_seconds: env_or("TURN_TIMEOUT_SECONDS", 30u64),
            pre_turn_grace_seconds: env_or("PRE_TURN_GRACE_SECONDS", 3u64),
            results_grace_seconds: env_or("RESULTS_GRACE_SECONDS", 10u64),
            queue_ttl_seconds: env_or("QUEUE_TTL_SECONDS", 300u64),
            deposit_poll_interval_ms: env_or("DEPOSIT_POLL_INTERVAL_MS", 1000u64),
            payout_max_attempts: env_or("PAYOUT_MAX_ATTEMPTS", 5u32),
            payout_backoff_ms: env_or("PAYOUT_BACKOFF_MS", 500u64),
            max_connections_per_ip: env_or("MAX_CONNECTIONS_PER_IP", 8usize),
            messages_per_second: env_or("WS_MESSAGES_PER_SECOND", 20u32),
            message_burst: env_or("WS_MESSAGE_BURST", 40u32),
        })
    }
}

impl Default for Settings {
    /// Development defaults; the well-known test mnemonic never holds funds.
    fn default() -> Self {
        Self {
            network: Network::Testnet10,
            wallet_mnemonic: "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about".to_string(),
            treasury_address: "kaspatest:treasury000000000000000000000000000000000".to_string(),
            house_cut_percent: 5,
            port: 8080,
            quick_match: RoomParams {
                seat_price: 10 * SOMPI_PER_KAS,
                min_players: 6,
                max_players: 6,
                timeout_seconds: 60,
            },
            custom_room: CustomRoomParams {
                min_seat_price: SOMPI_PER_KAS,
                max_seat_price: 1000 * SOMPI_PER_KAS,
                min_players: 2,
                max_players: 6,
                timeout_seconds: 60,
            },
            settlement_block_offset: 5,
            turn_timeout_seconds: 30,
            pre_turn_grace_seconds: 3,
            results_grace_seconds: 10,
            queue_ttl_seconds: 300,
            deposit_poll_interval_ms: 1000,
            payout_max_attempts: 5,
            payout_backoff_ms: 500,
            max_connections_per_ip: 8,
            messages_per_second: 20,
            message_burst: 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_prefixes() {
        assert_eq!(Network::Mainnet.address_prefix(), "kaspa");
        assert_eq!(Network::Testnet10.address_prefix(), "kaspatest");
    }

    #[test]
    fn test_network_parse() {
        assert_eq!(Network::parse("mainnet"), Some(Network::Mainnet));
        assert_eq!(Network::parse("testnet-10"), Some(Network::Testnet10));
        assert_eq!(Network::parse("devnet"), None);
    }

    #[test]
    fn test_defaults_are_sompi() {
        let s = Settings::default();
        assert_eq!(s.quick_match.seat_price, 1_000_000_000);
        assert_eq!(s.custom_room.max_seat_price, 100_000_000_000);
    }
}
