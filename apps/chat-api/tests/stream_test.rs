mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::SseReader;

use chat_api::bus::{MemoryBus, MessageBus};
use chat_api::AppState;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

/// Open a live stream on `room_id` with a bearer header.
async fn open_stream(addr: SocketAddr, room_id: &str, token: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/stream/{room_id}"))
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .expect("stream request")
}

async fn post_message(
    addr: SocketAddr,
    token: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/messages"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&body)
        .send()
        .await
        .expect("create request");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    resp.json().await.expect("parse created event")
}

async fn start() -> (SocketAddr, AppState) {
    let state = common::test_state().await;
    let addr = common::start_server(state.clone()).await;
    (addr, state)
}

#[tokio::test]
async fn stream_delivers_new_messages() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", Some(42));

    let resp = open_stream(addr, "general", &token).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let mut s1 = SseReader::new(resp);

    let created = post_message(
        addr,
        &token,
        serde_json::json!({ "roomId": "general", "senderId": 42, "text": "hi" }),
    )
    .await;

    let frame = s1.next_frame(WAIT).await.expect("event delivered");
    assert_eq!(frame.event.as_deref(), Some("message"));
    assert_eq!(frame.id.as_deref(), created["id"].as_str());
    assert_eq!(frame.json(), created);
    assert_eq!(frame.json()["senderId"], 42);

    assert!(s1.next_frame(QUIET).await.is_none());
}

#[tokio::test]
async fn late_subscribers_get_no_replay() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", Some(42));

    post_message(addr, &token, serde_json::json!({ "text": "before" })).await;

    let mut s2 = SseReader::new(open_stream(addr, "general", &token).await);
    assert!(s2.next_frame(QUIET).await.is_none());

    post_message(addr, &token, serde_json::json!({ "text": "after" })).await;
    let frame = s2.next_frame(WAIT).await.expect("new event delivered");
    assert_eq!(frame.json()["text"], "after");
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);

    let mut general = SseReader::new(open_stream(addr, "general", &token).await);
    let mut other = SseReader::new(open_stream(addr, "other", &token).await);

    post_message(
        addr,
        &token,
        serde_json::json!({ "roomId": "other", "text": "elsewhere" }),
    )
    .await;

    let frame = other.next_frame(WAIT).await.expect("delivered to other");
    assert_eq!(frame.json()["text"], "elsewhere");
    assert!(general.next_frame(QUIET).await.is_none());
}

#[tokio::test]
async fn stream_preserves_publish_order() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);
    let mut reader = SseReader::new(open_stream(addr, "ordered", &token).await);

    for i in 0..20 {
        post_message(
            addr,
            &token,
            serde_json::json!({ "roomId": "ordered", "text": i.to_string() }),
        )
        .await;
    }

    for i in 0..20 {
        let frame = reader.next_frame(WAIT).await.expect("in-order event");
        assert_eq!(frame.json()["text"], i.to_string());
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_accepts_query_token_without_header() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/stream/general?token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let mut reader = SseReader::new(resp);

    post_message(addr, &token, serde_json::json!({ "text": "via query" })).await;
    let frame = reader.next_frame(WAIT).await.expect("delivered");
    assert_eq!(frame.json()["text"], "via query");
}

#[tokio::test]
async fn stream_header_takes_precedence_over_query() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/stream/general?token={token}"))
        .header("Authorization", "Bearer garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthorized_stream_never_subscribes() {
    let (addr, state) = start().await;

    let missing = reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/stream/general"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let bad = reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/stream/general?token=nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::UNAUTHORIZED);

    assert_eq!(state.registry.room_count(), 0);
    assert_eq!(state.registry.total_subscribers(), 0);
}

#[tokio::test]
async fn blank_room_id_is_rejected() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);

    let resp = open_stream(addr, "%20%20", &token).await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(state.registry.total_subscribers(), 0);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_releases_subscription() {
    let mut config = common::test_config();
    config.stream_keepalive = Duration::from_millis(50);
    let state = common::state_on(config, Arc::new(MemoryBus::new())).await;
    let addr = common::start_server(state.clone()).await;
    let token = common::token(&state, "usr_alice", None);

    for _ in 0..5 {
        let resp = open_stream(addr, "general", &token).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(state.registry.subscriber_count("general"), 1);
        drop(resp);

        let registry = state.registry.clone();
        assert!(
            common::eventually(Duration::from_secs(5), || {
                registry.subscriber_count("general") == 0
            })
            .await,
            "subscription not released after disconnect"
        );
    }
}

#[tokio::test]
async fn registry_close_ends_open_streams() {
    let (addr, state) = start().await;
    let token = common::token(&state, "usr_alice", None);
    let resp = open_stream(addr, "general", &token).await;
    let mut body = resp.bytes_stream();

    state.registry.close();

    // Drain until the server finishes the body.
    let ended = tokio::time::timeout(WAIT, async {
        use futures_util::StreamExt;
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "stream did not end after registry close");
}

#[tokio::test]
async fn events_cross_processes_over_a_shared_bus() {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let p1 = common::state_on(common::test_config(), bus.clone()).await;
    let p2 = common::state_on(common::test_config(), bus).await;
    let addr1 = common::start_server(p1.clone()).await;
    let addr2 = common::start_server(p2.clone()).await;
    let token = common::token(&p1, "usr_alice", Some(42));

    let mut on_p2 = SseReader::new(open_stream(addr2, "general", &token).await);
    let mut on_p1 = SseReader::new(open_stream(addr1, "general", &token).await);

    let created = post_message(
        addr1,
        &token,
        serde_json::json!({ "roomId": "general", "text": "across" }),
    )
    .await;

    let remote = on_p2.next_frame(WAIT).await.expect("remote delivery");
    assert_eq!(remote.json(), created);
    let local = on_p1.next_frame(WAIT).await.expect("local delivery");
    assert_eq!(local.json(), created);
}
