use clap::Parser;
use tunnel_telemetry::LogFormat;

pub const REDIS_URL_ENV: &str = "TUNNEL_FLUSHER_REDIS_URL";
pub const KEY_PREFIX_ENV: &str = "TUNNEL_FLUSHER_KEY_PREFIX";
pub const MYSQL_DSN_ENV: &str = "TUNNEL_FLUSHER_MYSQL_DSN";
pub const INTERVAL_SECS_ENV: &str = "TUNNEL_FLUSHER_INTERVAL_SECS";
pub const MAX_BACKOFF_SECS_ENV: &str = "TUNNEL_FLUSHER_MAX_BACKOFF_SECS";
pub const LOG_FORMAT_ENV: &str = "TUNNEL_FLUSHER_LOG_FORMAT";
pub const BOOTSTRAP_SCHEMA_ENV: &str = "TUNNEL_FLUSHER_BOOTSTRAP_SCHEMA";

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_KEY_PREFIX: &str = "tunnel:clicks:";
pub const DEFAULT_INTERVAL_SECS: &str = "60";
pub const DEFAULT_MAX_BACKOFF_SECS: &str = "480";

#[derive(Debug, Parser)]
#[command(name = "tunnel-flusher", about = "Drains buffered clicks into MySQL")]
pub struct CLI {
    #[arg(long, env = REDIS_URL_ENV, default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    #[arg(long, env = KEY_PREFIX_ENV, default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    #[arg(long, env = MYSQL_DSN_ENV)]
    pub mysql_dsn: String,

    /// Seconds between drain passes.
    #[arg(long, env = INTERVAL_SECS_ENV, default_value = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Upper bound in seconds for the delay after failing passes.
    #[arg(long, env = MAX_BACKOFF_SECS_ENV, default_value = DEFAULT_MAX_BACKOFF_SECS)]
    pub max_backoff_secs: u64,

    #[arg(long, env = LOG_FORMAT_ENV, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Create missing tables before the first drain.
    #[arg(long, env = BOOTSTRAP_SCHEMA_ENV)]
    pub bootstrap_schema: bool,
}
