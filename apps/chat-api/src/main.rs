use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_api::bus::{MemoryBus, MessageBus, RedisBus};
use chat_api::config::{BusBackend, Config};
use chat_api::db::messages::{MemoryMessageStore, MessageStore};
use chat_api::gateway::registry::{self, RoomRegistry};
use chat_api::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_api=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let bus: Arc<dyn MessageBus> = match config.bus_backend {
        BusBackend::Redis => match RedisBus::connect(&config.redis_url).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to redis");
                return ExitCode::FAILURE;
            }
        },
        BusBackend::Memory => {
            tracing::warn!("using in-process bus; live delivery will not cross processes");
            Arc::new(MemoryBus::new())
        }
    };

    let messages: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new(config.worker_id));
    let state = AppState::new(config, bus, messages);

    let listener_handle = match state.bridge.start().await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start bus listener");
            return ExitCode::FAILURE;
        }
    };

    let sweeper = state.config.room_idle_ttl.map(|ttl| {
        registry::spawn_idle_sweeper(
            state.registry.clone(),
            state.config.room_sweep_interval,
            ttl,
        )
    });

    tracing::info!(
        bus = ?state.config.bus_backend,
        stream_buffer = state.config.stream_buffer,
        default_room = %state.config.default_room,
        "chat-api configured"
    );

    let registry = state.registry.clone();
    let app = chat_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "chat-api listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await;

    listener_handle.shutdown();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    match served {
        Ok(()) => {
            tracing::info!("chat-api stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM. Closes the registry first so open streams
/// end and the server can drain.
async fn shutdown_signal(registry: Arc<RoomRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received; closing live streams");
    registry.close();
}
