//! Application settings: a YAML file for static shape, environment
//! variables for the knobs operators actually turn at deploy time.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORE_CONNECTION_STRING: &str = "sqlite://data/autoscraper.db";

/// Top-level application configuration loaded from a YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file, falling back to defaults for
    /// everything it omits.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// HTTP server bind address.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Document store connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub connection_string: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: DEFAULT_STORE_CONNECTION_STRING.to_string(),
        }
    }
}

/// Environment-variable-driven runtime settings. These govern the
/// worker pool, rate limiter defaults, scheduler cadence, and auth secret —
/// the knobs that change per-deployment rather than per-board.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_concurrent_jobs: u32,
    pub default_rate_limit_delay_s: f64,
    pub default_request_timeout_s: u64,
    pub scheduler_tick: Duration,
    pub heartbeat_interval: Duration,
    pub graceful_shutdown_timeout: Duration,
    pub auth_secret: String,
    pub store_connection_string: String,
    pub log_level: String,
    pub rate_limit_requests_per_window: u32,
    pub rate_limit_window: Duration,
}

impl Settings {
    /// Reads every `Settings` field from its environment variable, falling
    /// back to a documented default when unset. Invalid values (non-numeric)
    /// fail startup instead of silently using the default, so a typo'd env
    /// var surfaces immediately.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            max_concurrent_jobs: env_parsed("MAX_CONCURRENT_JOBS", 5)?,
            default_rate_limit_delay_s: env_parsed("DEFAULT_RATE_LIMIT_DELAY_S", 1.0)?,
            default_request_timeout_s: env_parsed("DEFAULT_REQUEST_TIMEOUT_S", 30)?,
            scheduler_tick: Duration::from_millis(env_parsed("SCHEDULER_TICK_MS", 1000)?),
            heartbeat_interval: Duration::from_secs(env_parsed("HEARTBEAT_INTERVAL_S", 10)?),
            graceful_shutdown_timeout: Duration::from_secs(env_parsed(
                "GRACEFUL_SHUTDOWN_TIMEOUT_S",
                30,
            )?),
            auth_secret: std::env::var("AUTH_SECRET")
                .unwrap_or_else(|_| "development-only-secret".to_string()),
            store_connection_string: std::env::var("STORE_CONNECTION_STRING")
                .unwrap_or_else(|_| DEFAULT_STORE_CONNECTION_STRING.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            rate_limit_requests_per_window: env_parsed("RATE_LIMIT_REQUESTS_PER_WINDOW", 100)?,
            rate_limit_window: Duration::from_secs(env_parsed("RATE_LIMIT_WINDOW_S", 60)?),
        })
    }
}

fn env_parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.connection_string, DEFAULT_STORE_CONNECTION_STRING);
    }

    #[test]
    fn env_parsed_falls_back_on_missing_var() {
        let value: u32 = env_parsed("AUTOSCRAPER_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
