//! Router-level checks through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{fast_settings, TestWorld};
use http_body_util::BodyExt;
use luckychamber_axum::models::{GameMode, SOMPI_PER_KAS};
use luckychamber_axum::{app_router, AppState};
use serde_json::Value;
use tower::util::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let world = TestWorld::new(fast_settings()).await;
    let app = app_router(AppState {
        rooms: world.rooms.clone(),
        hub: world.hub.clone(),
    });
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "luckychamber-axum");
}

#[tokio::test]
async fn test_room_listing_shows_open_rooms() {
    let world = TestWorld::new(fast_settings()).await;
    let room_id = world
        .rooms
        .create_room(GameMode::Regular, 10 * SOMPI_PER_KAS, 2, 6, 60)
        .await
        .unwrap();
    world.rooms.join_room(&room_id, "kaspatest:w1").await.unwrap();

    let app = app_router(AppState {
        rooms: world.rooms.clone(),
        hub: world.hub.clone(),
    });
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/rooms")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let rooms = json["rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["id"], room_id.as_str());
    assert_eq!(rooms[0]["state"], "FUNDING");
    // the commitment is public, the seed is not
    assert!(rooms[0]["serverCommit"].is_string());
    assert!(rooms[0]["serverSeed"].is_null());
}
