//! # Commit-Reveal Randomness Engine
//!
//! ## Purpose
//! Deterministic, publicly verifiable per-round randomness. The server
//! commits to a 32-byte seed at room creation (SHA-256 published up front)
//! and reveals the seed once the room is terminal. Every round's randomness
//! is an HMAC over inputs that all end up in the public room record:
//!
//! ```text
//! sorted   = lexicographic sort of lowercase hex client seeds
//! message  = join(sorted ++ [room_id, decimal(round_index), block_hash], '|')
//! digest   = HMAC-SHA-256(key = server_seed, data = message)
//! ```
//!
//! The settlement block hash is chain entropy fixed after the seats lock, so
//! neither side can steer it; the commit binds the server before any client
//! seed exists.
//!
//! ## Chamber draw
//! The first 4 digest bytes, read big-endian, select a chamber `i` out of `N`
//! (`N` = alive seats at round start). `bullets` chambers `0..bullets` are
//! loaded; the chamber facing the shooter at alive-position `p` is
//! `(p - i) mod N`. With one bullet that reduces to "dies iff `i == p`".
//! REGULAR loads one bullet, EXTREME loads `N - 1`.
//!
//! Precondition failures (missing seed, empty client seed set) are invariant
//! errors: the caller must refuse the transition that would consume the draw.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{GameError, GameResult};
use crate::models::GameMode;

type HmacSha256 = Hmac<Sha256>;

/// A freshly generated server seed with its published commitment.
#[derive(Debug, Clone)]
pub struct SeedCommit {
    /// 64 hex chars, kept private until reveal.
    pub server_seed: String,
    /// SHA-256 of the seed bytes, hex. Published at room creation.
    pub server_commit: String,
}

/// Generates 32 bytes of cryptographic randomness and its commitment.
pub fn generate_seed_commit() -> SeedCommit {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let server_seed = hex::encode(seed);
    let server_commit = hex::encode(Sha256::digest(seed));
    SeedCommit {
        server_seed,
        server_commit,
    }
}

/// Recomputes the commitment for a revealed seed.
pub fn commit_of(server_seed_hex: &str) -> GameResult<String> {
    let seed = hex::decode(server_seed_hex)
        .map_err(|_| GameError::invariant("server seed is not valid hex"))?;
    Ok(hex::encode(Sha256::digest(&seed)))
}

/// Verifies a reveal against its published commitment.
pub fn verify_reveal(server_seed_hex: &str, server_commit_hex: &str) -> bool {
    commit_of(server_seed_hex)
        .map(|c| c == server_commit_hex)
        .unwrap_or(false)
}

/// The exact message hashed for one round, reproducible by any verifier.
pub fn round_message(
    client_seeds: &[String],
    room_id: &str,
    round_index: usize,
    block_hash: &str,
) -> String {
    let mut sorted: Vec<String> = client_seeds
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .collect();
    sorted.sort();
    let mut parts = sorted;
    parts.push(room_id.to_string());
    parts.push(round_index.to_string());
    parts.push(block_hash.to_string());
    parts.join("|")
}

/// Derives one round's randomness. Hex HMAC-SHA-256 output, stored verbatim
/// in the round log.
pub fn round_randomness(
    server_seed_hex: &str,
    client_seeds: &[String],
    room_id: &str,
    round_index: usize,
    block_hash: &str,
) -> GameResult<String> {
    if client_seeds.is_empty() {
        return Err(GameError::invariant(
            "round randomness requires at least one client seed",
        ));
    }
    if block_hash.is_empty() {
        return Err(GameError::invariant(
            "round randomness requires the settlement block hash",
        ));
    }
    let key = hex::decode(server_seed_hex)
        .map_err(|_| GameError::invariant("server seed is not valid hex"))?;
    let message = round_message(client_seeds, room_id, round_index, block_hash);
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| GameError::invariant("server seed rejected as HMAC key"))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Loaded-chamber index: first 4 digest bytes, big-endian, mod the chamber
/// count.
pub fn chamber_draw(randomness_hex: &str, chambers: usize) -> GameResult<usize> {
    if chambers == 0 {
        return Err(GameError::invariant("chamber draw over zero chambers"));
    }
    let bytes = hex::decode(randomness_hex)
        .map_err(|_| GameError::invariant("round randomness is not valid hex"))?;
    if bytes.len() < 4 {
        return Err(GameError::invariant("round randomness shorter than 4 bytes"));
    }
    let head = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok(head as usize % chambers)
}

/// Bullets loaded for a round of `chambers` chambers.
pub fn bullets_for(mode: GameMode, chambers: usize) -> usize {
    match mode {
        GameMode::Regular => 1,
        GameMode::Extreme => chambers.saturating_sub(1).max(1),
    }
}

/// Whether the shooter at alive-position `shooter_pos` dies on draw `draw`.
///
/// Chambers `0..bullets` are loaded; the cylinder is rotated by the draw, so
/// the chamber facing the shooter is `(shooter_pos - draw) mod chambers`.
pub fn shooter_dies(draw: usize, shooter_pos: usize, chambers: usize, bullets: usize) -> bool {
    debug_assert!(shooter_pos < chambers && draw < chambers);
    let facing = (shooter_pos + chambers - draw) % chambers;
    facing < bullets
}
