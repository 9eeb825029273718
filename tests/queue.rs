//! Matchmaking queue: bucket membership, FIFO draining into rooms,
//! staleness and the assignment callback.

mod common;

use common::{fast_settings, TestWorld};
use luckychamber_axum::models::{GameMode, RoomState, SOMPI_PER_KAS};

const PRICE: u64 = 10 * SOMPI_PER_KAS;

#[tokio::test]
async fn test_full_bucket_materializes_into_a_room() {
    let mut world = TestWorld::new(fast_settings()).await;
    assert_eq!(
        world
            .queue
            .join("kaspatest:w1", GameMode::Regular, PRICE)
            .await
            .unwrap(),
        1
    );
    // second join reaches min_players (2 in the test settings)
    assert_eq!(
        world
            .queue
            .join("kaspatest:w2", GameMode::Regular, PRICE)
            .await
            .unwrap(),
        0
    );

    let assignment = world.assignments.recv().await.unwrap();
    assert_eq!(
        assignment.wallets,
        vec!["kaspatest:w1".to_string(), "kaspatest:w2".to_string()]
    );
    let snapshot = world.rooms.snapshot(&assignment.room_id).await.unwrap();
    assert_eq!(snapshot.state, RoomState::Funding);
    // seats assigned in drain order
    assert_eq!(
        snapshot.seats[0].wallet_address.as_deref(),
        Some("kaspatest:w1")
    );
    assert_eq!(
        snapshot.seats[1].wallet_address.as_deref(),
        Some("kaspatest:w2")
    );
    assert_eq!(snapshot.seat_price, PRICE);
}

/// A bucket at a non-quick-match price fills and sizes on the custom-room
/// profile, not the quick-match one.
#[tokio::test]
async fn test_custom_priced_bucket_uses_custom_room_profile() {
    let mut settings = fast_settings();
    settings.custom_room.min_players = 3;
    settings.custom_room.timeout_seconds = 120;
    let mut world = TestWorld::new(settings).await;

    // 25 KAS is inside the custom bounds but is not the quick-match price
    let custom_price = 25 * SOMPI_PER_KAS;
    assert_eq!(
        world
            .queue
            .join("kaspatest:c1", GameMode::Regular, custom_price)
            .await
            .unwrap(),
        1
    );
    // two waiting wallets satisfy the quick-match minimum (2 in the test
    // settings) but must not trigger the custom lane's minimum of 3
    assert_eq!(
        world
            .queue
            .join("kaspatest:c2", GameMode::Regular, custom_price)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        world
            .queue
            .join("kaspatest:c3", GameMode::Regular, custom_price)
            .await
            .unwrap(),
        0
    );

    let assignment = world.assignments.recv().await.unwrap();
    assert_eq!(assignment.wallets.len(), 3);
    let snapshot = world.rooms.snapshot(&assignment.room_id).await.unwrap();
    assert_eq!(snapshot.seat_price, custom_price);
    assert_eq!(snapshot.max_players, 3);
    // funding window comes from the custom profile
    assert_eq!(snapshot.expires_at, snapshot.created_at + 120_000);
}

#[tokio::test]
async fn test_wallet_holds_one_bucket_membership() {
    let world = TestWorld::new(fast_settings()).await;
    world
        .queue
        .join("kaspatest:w1", GameMode::Regular, PRICE)
        .await
        .unwrap();
    // re-joining the same bucket does not duplicate
    world
        .queue
        .join("kaspatest:w1", GameMode::Regular, PRICE)
        .await
        .unwrap();
    assert_eq!(world.queue.waiting(GameMode::Regular, PRICE).await, 1);

    // joining another bucket moves the wallet
    world
        .queue
        .join("kaspatest:w1", GameMode::Extreme, PRICE)
        .await
        .unwrap();
    assert_eq!(world.queue.waiting(GameMode::Regular, PRICE).await, 0);
    assert_eq!(world.queue.waiting(GameMode::Extreme, PRICE).await, 1);
}

#[tokio::test]
async fn test_leave_reports_the_vacated_bucket() {
    let world = TestWorld::new(fast_settings()).await;
    world
        .queue
        .join("kaspatest:w1", GameMode::Regular, PRICE)
        .await
        .unwrap();
    let (mode, price, remaining) = world.queue.leave("kaspatest:w1").await.unwrap();
    assert_eq!(mode, GameMode::Regular);
    assert_eq!(price, PRICE);
    assert_eq!(remaining, 0);
    assert!(world.queue.leave("kaspatest:w1").await.is_none());
}

#[tokio::test]
async fn test_seat_price_bounds_enforced() {
    let world = TestWorld::new(fast_settings()).await;
    assert!(world
        .queue
        .join("kaspatest:w1", GameMode::Regular, 0)
        .await
        .is_err());
    assert!(world
        .queue
        .join("kaspatest:w1", GameMode::Regular, 100_000 * SOMPI_PER_KAS)
        .await
        .is_err());
}

#[tokio::test]
async fn test_stale_entries_are_swept() {
    let mut settings = fast_settings();
    settings.queue_ttl_seconds = 0;
    let world = TestWorld::new(settings).await;
    world
        .queue
        .join("kaspatest:w1", GameMode::Regular, PRICE)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(world.queue.sweep_stale().await, 1);
    assert_eq!(world.queue.waiting(GameMode::Regular, PRICE).await, 0);
}
