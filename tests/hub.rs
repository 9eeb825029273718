//! Hub protocol behavior driven without sockets: wallet binding, per-IP
//! caps, the unique-user count, and per-room event ordering across
//! subscribers.

mod common;

use std::net::{IpAddr, Ipv4Addr};

use axum::extract::ws::Message;
use common::{fast_settings, TestWorld};
use luckychamber_axum::models::{RoomState, SOMPI_PER_KAS};
use serde_json::Value;
use tokio::sync::mpsc;

const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}

fn frame(event: &str, payload: Value) -> String {
    serde_json::json!({"event": event, "payload": payload}).to_string()
}

/// A connection binds to the first wallet it claims; a later frame claiming
/// another wallet gets an error, mutates nothing, and the connection stays
/// open and bound to the original wallet.
#[tokio::test]
async fn test_wallet_rebinding_is_rejected() {
    let world = TestWorld::new(fast_settings()).await;
    let (conn, mut rx) = world.hub.register_connection(IP).unwrap();

    world
        .hub
        .process_frame(
            conn,
            &frame(
                "join_queue",
                serde_json::json!({"mode": "REGULAR", "seatPrice": 10, "walletAddress": "kaspatest:w1"}),
            ),
        )
        .await;
    assert_eq!(world.hub.bound_wallet(conn).as_deref(), Some("kaspatest:w1"));
    drain(&mut rx);

    world
        .hub
        .process_frame(
            conn,
            &frame(
                "submit_client_seed",
                serde_json::json!({"roomId": "r", "seatIndex": 0, "clientSeed": "ab", "walletAddress": "kaspatest:w2"}),
            ),
        )
        .await;

    let frames = drain(&mut rx);
    assert!(frames
        .iter()
        .any(|f| f["event"] == "error" && f["payload"]["code"] == "validation"));
    // still bound to the original wallet, still able to act
    assert_eq!(world.hub.bound_wallet(conn).as_deref(), Some("kaspatest:w1"));
    world
        .hub
        .process_frame(conn, &frame("leave_queue", serde_json::json!({})))
        .await;
    assert!(drain(&mut rx).iter().any(|f| f["event"] == "queue:left"));
}

#[tokio::test]
async fn test_actions_require_identification() {
    let world = TestWorld::new(fast_settings()).await;
    let (conn, mut rx) = world.hub.register_connection(IP).unwrap();
    world
        .hub
        .process_frame(conn, &frame("pull_trigger", serde_json::json!({"roomId": "r"})))
        .await;
    let frames = drain(&mut rx);
    assert!(frames
        .iter()
        .any(|f| f["event"] == "error" && f["payload"]["code"] == "validation"));
}

#[tokio::test]
async fn test_malformed_frames_get_error_replies() {
    let world = TestWorld::new(fast_settings()).await;
    let (conn, mut rx) = world.hub.register_connection(IP).unwrap();
    world.hub.process_frame(conn, "not json at all").await;
    world
        .hub
        .process_frame(conn, &frame("no_such_event", serde_json::json!({})))
        .await;
    let frames = drain(&mut rx);
    assert_eq!(
        frames.iter().filter(|f| f["event"] == "error").count(),
        2
    );
}

#[tokio::test]
async fn test_per_ip_connection_cap() {
    let mut settings = fast_settings();
    settings.max_connections_per_ip = 2;
    let world = TestWorld::new(settings).await;
    let _c1 = world.hub.register_connection(IP).unwrap();
    let _c2 = world.hub.register_connection(IP).unwrap();
    assert!(world.hub.register_connection(IP).is_err());
    // a different address is unaffected
    assert!(world
        .hub
        .register_connection(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        .is_ok());
}

#[tokio::test]
async fn test_unique_wallet_count_deduplicates_tabs() {
    let world = TestWorld::new(fast_settings()).await;
    let (c1, _r1) = world.hub.register_connection(IP).unwrap();
    let (c2, _r2) = world.hub.register_connection(IP).unwrap();
    let (c3, _r3) = world.hub.register_connection(IP).unwrap();

    let join = |wallet: &str| {
        frame(
            "join_queue",
            serde_json::json!({"mode": "REGULAR", "seatPrice": 10, "walletAddress": wallet}),
        )
    };
    world.hub.process_frame(c1, &join("kaspatest:w1")).await;
    world.hub.process_frame(c2, &join("kaspatest:w1")).await;
    assert_eq!(world.hub.unique_wallet_count(), 1);
    world.hub.process_frame(c3, &join("kaspatest:w2")).await;
    assert_eq!(world.hub.unique_wallet_count(), 2);

    world.hub.unregister_connection(c3);
    assert_eq!(world.hub.unique_wallet_count(), 1);
    world.hub.unregister_connection(c1);
    // w1 still bound through the second tab
    assert_eq!(world.hub.unique_wallet_count(), 1);
    world.hub.unregister_connection(c2);
    assert_eq!(world.hub.unique_wallet_count(), 0);
}

/// Every subscriber of a room observes the same `round:result` sequence,
/// and that sequence is a prefix of the room's round log.
#[tokio::test]
async fn test_subscribers_see_identical_event_order() {
    let world = TestWorld::new(fast_settings()).await;
    let room_id = world
        .seated_room(&["kaspatest:w1", "kaspatest:w2"], 2)
        .await;

    let (c1, mut r1) = world.hub.register_connection(IP).unwrap();
    let (c2, mut r2) = world.hub.register_connection(IP).unwrap();
    world.hub.subscribe(c1, &room_id);
    world.hub.subscribe(c2, &room_id);

    world.fund_all_seats(&room_id).await;
    world.submit_seed(&room_id, "kaspatest:w1", 0, "ab").await;
    world.reach_settlement(&room_id).await;
    let snapshot = world.wait_for_state(&room_id, RoomState::Settled).await;
    // let the event pump drain
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let results = |frames: Vec<Value>| -> Vec<u64> {
        frames
            .into_iter()
            .filter(|f| f["event"] == "round:result")
            .map(|f| f["payload"]["round"]["index"].as_u64().unwrap())
            .collect()
    };
    let seq1 = results(drain(&mut r1));
    let seq2 = results(drain(&mut r2));
    assert!(!seq1.is_empty());
    assert_eq!(seq1, seq2);
    // gap-free prefix of the persisted log
    let expected: Vec<u64> = (0..snapshot.rounds.len() as u64).collect();
    assert_eq!(seq1, expected[..seq1.len()]);
    assert_eq!(snapshot.seat_price, 10 * SOMPI_PER_KAS);
}
