use std::time::Duration;

/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset the service runs on in-memory stores.
    pub database_url: Option<String>,
    /// Shared secret used to verify bearer tokens issued by the auth service.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Number of comments sent as history on connect and by default on reads.
    pub history_limit: usize,
    /// Comments older than this are pruned by the retention sweeper.
    pub retention_hours: i64,
    /// Upper bound on comments kept by the in-memory store.
    pub max_retained_comments: usize,
    /// Sessions silent for longer than this are disconnected.
    pub idle_timeout_secs: u64,
    /// Outbound frames buffered per session before it is dropped as a slow consumer.
    pub session_buffer: usize,
    /// Minimum spacing between viewer-count broadcasts.
    pub viewer_count_interval_ms: u64,
    /// Per-IP cooldown between comment submissions. `0` disables it.
    pub comment_cooldown_secs: u64,
    /// Reject comments containing prohibited words, phone numbers or links.
    pub content_filter: bool,
    /// Take the client address from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,
    /// Maximum number of comments replayed to a reconnecting client.
    pub replay_window: usize,
    /// How long match info stays on screen without a fresh update.
    pub match_info_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT", 8080),
            history_limit: parsed_var("HISTORY_LIMIT", 100),
            retention_hours: parsed_var("COMMENT_RETENTION_HOURS", 24),
            max_retained_comments: parsed_var("MAX_RETAINED_COMMENTS", 10_000),
            idle_timeout_secs: parsed_var("IDLE_TIMEOUT_SECS", 60),
            session_buffer: parsed_var("SESSION_BUFFER", 256),
            viewer_count_interval_ms: parsed_var("VIEWER_COUNT_INTERVAL_MS", 1000),
            comment_cooldown_secs: parsed_var("COMMENT_COOLDOWN_SECS", 3),
            content_filter: parsed_var("CONTENT_FILTER", true),
            trust_forwarded_for: parsed_var("TRUST_FORWARDED_FOR", false),
            replay_window: parsed_var("REPLAY_WINDOW", 100),
            match_info_ttl_secs: parsed_var("MATCH_INFO_TTL_SECS", 7200),
        }
    }

    /// Defaults suitable for tests and local development.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.to_string(),
            port: 0,
            history_limit: 100,
            retention_hours: 24,
            max_retained_comments: 10_000,
            idle_timeout_secs: 60,
            session_buffer: 256,
            viewer_count_interval_ms: 1000,
            comment_cooldown_secs: 0,
            content_filter: true,
            trust_forwarded_for: true,
            replay_window: 100,
            match_info_ttl_secs: 7200,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn viewer_count_interval(&self) -> Duration {
        Duration::from_millis(self.viewer_count_interval_ms)
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
