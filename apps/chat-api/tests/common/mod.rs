#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::time;

use chat_api::auth::tokens::{mint_access_token, ACCESS_TOKEN_TTL_SECS};
use chat_api::bus::{MemoryBus, MessageBus};
use chat_api::config::{BusBackend, Config};
use chat_api::db::messages::MemoryMessageStore;
use chat_api::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_ISSUER: &str = "chat-api";

/// Configuration for tests: no environment, in-process bus, no idle sweeper.
pub fn test_config() -> Config {
    Config {
        port: 0,
        bus_backend: BusBackend::Memory,
        redis_url: String::new(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_issuer: TEST_ISSUER.to_string(),
        default_room: "general".to_string(),
        max_message_len: 2000,
        stream_buffer: 64,
        stream_keepalive: Duration::from_secs(15),
        room_idle_ttl: None,
        room_sweep_interval: Duration::from_secs(60),
        worker_id: 0,
    }
}

/// Build a state on `bus` and start its bridge listener.
///
/// The listener handle is dropped, which detaches the task; it lives as long
/// as the test runtime.
pub async fn state_on(config: Config, bus: Arc<dyn MessageBus>) -> AppState {
    let messages = Arc::new(MemoryMessageStore::new(config.worker_id));
    let state = AppState::new(config, bus, messages);
    state.bridge.start().await.expect("start bus listener");
    state
}

/// A state on its own in-memory bus.
pub async fn test_state() -> AppState {
    state_on(test_config(), Arc::new(MemoryBus::new())).await
}

/// Build the full application router wired to a fresh test state.
pub async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    let app = chat_api::app(state.clone());
    (app, state)
}

/// Mint a valid access token for `user_id`.
pub fn token(state: &AppState, user_id: &str, sender_id: Option<i64>) -> String {
    mint_access_token(&state.jwt, user_id, sender_id, ACCESS_TOKEN_TTL_SECS)
        .expect("mint token")
}

/// Start an actual TCP server for streaming tests. Returns the bound address.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = chat_api::app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// One parsed Server-Sent Event frame.
#[derive(Debug, Clone, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.data).expect("event data is JSON")
    }
}

/// Minimal SSE reader over a streaming `reqwest` body.
pub struct SseReader {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: String,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buf: String::new(),
        }
    }

    /// Next frame carrying data, skipping keep-alive comments. `None` on
    /// timeout or end of stream.
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<SseFrame> {
        time::timeout(timeout, async {
            loop {
                while let Some(end) = self.buf.find("\n\n") {
                    let raw: String = self.buf.drain(..end + 2).collect();
                    if let Some(frame) = parse_frame(&raw) {
                        return Some(frame);
                    }
                }
                let chunk = self.body.next().await?.ok()?;
                self.buf.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .ok()
        .flatten()
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data = Vec::new();
    for line in raw.lines() {
        if let Some(v) = line.strip_prefix("event:") {
            frame.event = Some(v.trim_start().to_string());
        } else if let Some(v) = line.strip_prefix("id:") {
            frame.id = Some(v.trim_start().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push(v.strip_prefix(' ').unwrap_or(v));
        }
    }
    if data.is_empty() {
        return None;
    }
    frame.data = data.join("\n");
    Some(frame)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = time::Instant::now() + timeout;
    while time::Instant::now() < deadline {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
