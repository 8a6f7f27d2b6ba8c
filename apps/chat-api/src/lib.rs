pub mod auth;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use auth::tokens::JwtKeys;
use bus::MessageBus;
use config::Config;
use db::messages::MessageStore;
use gateway::fanout::BusBridge;
use gateway::registry::RoomRegistry;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: Arc<JwtKeys>,
    pub registry: Arc<RoomRegistry>,
    pub bridge: Arc<BusBridge>,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    /// Wire a fresh registry and bridge on top of `bus`.
    ///
    /// The bridge listener is not started here; call
    /// [`BusBridge::start`] once the state is built.
    pub fn new(
        config: Config,
        bus: Arc<dyn MessageBus>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.stream_buffer));
        let bridge = Arc::new(BusBridge::new(bus, registry.clone()));
        let jwt = Arc::new(JwtKeys::from_config(&config));

        Self {
            config: Arc::new(config),
            jwt,
            registry,
            bridge,
            messages,
        }
    }
}

/// The full HTTP application: every route plus CORS, request ids and tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    // Outermost last: the id is set before the trace span is opened.
    routes::router()
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
