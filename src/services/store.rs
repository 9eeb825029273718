//! # Durable Room Store
//!
//! ## Purpose
//! Persistence boundary for room state. The contract the orchestrator needs
//! is small: atomic whole-room upserts (multi-room transactions are never
//! required) and enough durability to rebuild every non-terminal room after a
//! process restart.
//!
//! `MemoryStore` is the in-process implementation used by the binary and the
//! test suite; a SQLite-backed implementation plugs in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::GameResult;
use crate::models::{Room, RoomState};

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Atomically writes the full room record.
    async fn upsert_room(&self, room: &Room) -> GameResult<()>;

    async fn load_room(&self, id: &str) -> GameResult<Option<Room>>;

    /// Rooms currently in any of the given states.
    async fn rooms_in_states(&self, states: &[RoomState]) -> GameResult<Vec<Room>>;

    async fn all_rooms(&self) -> GameResult<Vec<Room>>;
}

/// In-memory store; a `RwLock` map keyed by room id.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, Room>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn upsert_room(&self, room: &Room) -> GameResult<()> {
        self.rooms
            .write()
            .await
            .insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn load_room(&self, id: &str) -> GameResult<Option<Room>> {
        Ok(self.rooms.read().await.get(id).cloned())
    }

    async fn rooms_in_states(&self, states: &[RoomState]) -> GameResult<Vec<Room>> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect())
    }

    async fn all_rooms(&self) -> GameResult<Vec<Room>> {
        Ok(self.rooms.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameMode, SOMPI_PER_KAS};

    fn sample_room(id: &str) -> Room {
        Room::new(
            id.to_string(),
            GameMode::Regular,
            10 * SOMPI_PER_KAS,
            2,
            2,
            5,
            "11".repeat(32),
            "ab".repeat(32),
            vec!["kaspatest:a".into(), "kaspatest:b".into()],
            60,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_load() {
        let store = MemoryStore::new();
        let room = sample_room("r1");
        store.upsert_room(&room).await.unwrap();
        let loaded = store.load_room("r1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "r1");
        assert!(store.load_room("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_filter() {
        let store = MemoryStore::new();
        let mut a = sample_room("a");
        let mut b = sample_room("b");
        a.state = RoomState::Funding;
        b.state = RoomState::Settled;
        store.upsert_room(&a).await.unwrap();
        store.upsert_room(&b).await.unwrap();
        let open = store
            .rooms_in_states(&[RoomState::Lobby, RoomState::Funding])
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "a");
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryStore::new();
        let mut room = sample_room("r1");
        store.upsert_room(&room).await.unwrap();
        room.state = RoomState::Funding;
        store.upsert_room(&room).await.unwrap();
        assert_eq!(store.all_rooms().await.unwrap().len(), 1);
        assert_eq!(
            store.load_room("r1").await.unwrap().unwrap().state,
            RoomState::Funding
        );
    }
}
