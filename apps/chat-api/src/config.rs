use std::str::FromStr;
use std::time::Duration;

/// Which publish/subscribe transport the bus bridge runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// Redis `PUBLISH` / `PSUBSCRIBE`. Required for multi-process deployments.
    Redis,
    /// In-process bus. Single process only; used for local development.
    Memory,
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown bus backend `{other}`")),
        }
    }
}

/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Bus transport used by the bridge.
    pub bus_backend: BusBackend,
    /// Redis connection string (used when `bus_backend` is `Redis`).
    pub redis_url: String,
    /// HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,
    /// Expected `iss` claim on bearer tokens.
    pub jwt_issuer: String,
    /// Room used when a message is created without a `roomId`.
    pub default_room: String,
    /// Maximum message text length, in characters.
    pub max_message_len: usize,
    /// Per-room ring size. A subscriber further behind than this skips the
    /// oldest events.
    pub stream_buffer: usize,
    /// Interval between SSE keep-alive comments.
    pub stream_keepalive: Duration,
    /// How long a room must sit with zero subscribers before it is evicted.
    /// `None` disables eviction.
    pub room_idle_ttl: Option<Duration>,
    /// How often the idle sweeper runs.
    pub room_sweep_interval: Duration,
    /// Snowflake worker id for this process.
    pub worker_id: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing or
    /// a variable is set to something unparseable.
    pub fn from_env() -> Self {
        let idle_ttl_secs: u64 = parsed_var("ROOM_IDLE_TTL_SECS", 300);
        Self {
            port: parsed_var("PORT", 8080),
            bus_backend: parsed_var("BUS_BACKEND", BusBackend::Redis),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            jwt_secret: required_var("JWT_SECRET"),
            jwt_issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "chat-api".to_string()),
            default_room: std::env::var("DEFAULT_ROOM")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "general".to_string()),
            max_message_len: parsed_var("MAX_MESSAGE_LEN", 2000),
            stream_buffer: parsed_var::<usize>("STREAM_BUFFER", 1024).max(1),
            stream_keepalive: whole_secs(parsed_var("STREAM_KEEPALIVE_SECS", 15)),
            room_idle_ttl: (idle_ttl_secs > 0).then(|| Duration::from_secs(idle_ttl_secs)),
            room_sweep_interval: whole_secs(parsed_var("ROOM_SWEEP_INTERVAL_SECS", 60)),
            worker_id: parsed_var("WORKER_ID", 0),
        }
    }
}

/// Intervals that drive timers; zero would spin, so it is raised to one second.
fn whole_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} env var is invalid: {e}")),
        _ => default,
    }
}
