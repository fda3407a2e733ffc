//! Server and realtime pipeline configuration.
//!
//! Values come from three layers, later layers winning:
//! 1. built-in defaults
//! 2. the `[realtime]` section of `repository.toml`
//! 3. environment variables
//!
//! # Environment Variables
//! - `HOST`: bind host (default: 0.0.0.0)
//! - `PORT`: bind port (default: 5000)
//! - `HEARTIFY_CONNECTION_QUEUE`: per-connection outbound queue (default: 64)
//! - `HEARTIFY_LEGACY_BROADCAST`: also deliver on the unscoped channel (default: true)
//! - `HEARTIFY_RECONNECT_INITIAL_MS`: first resubscribe delay (default: 500)
//! - `HEARTIFY_RECONNECT_MAX_MS`: resubscribe delay cap (default: 30000)
//! - `HEARTIFY_RECONNECT_MULTIPLIER`: delay growth factor (default: 2)
//! - `HEARTIFY_AGGREGATE_REFRESH_SECS`: client aggregate refresh interval (default: 30)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::db::RepositoryConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

/// Resubscribe delay policy for the change watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Settings for the change pipeline and its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Outbound messages buffered per connection before deliveries are dropped.
    pub connection_queue_capacity: usize,
    /// Deliver every event on the unscoped `changeUpdate` channel too.
    pub legacy_broadcast: bool,
    pub reconnect: BackoffConfig,
    /// Minimum interval between client aggregate refreshes.
    pub aggregate_refresh_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            connection_queue_capacity: 64,
            legacy_broadcast: true,
            reconnect: BackoffConfig::default(),
            aggregate_refresh_secs: 30,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Ignoring invalid boolean for {}: {:?}", key, raw);
            None
        }
    }
}

impl RealtimeConfig {
    pub fn aggregate_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.aggregate_refresh_secs)
    }

    /// Overlay `HEARTIFY_*` environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("HEARTIFY_CONNECTION_QUEUE") {
            self.connection_queue_capacity = v;
        }
        if let Some(v) = env_bool("HEARTIFY_LEGACY_BROADCAST") {
            self.legacy_broadcast = v;
        }
        if let Some(v) = env_parse("HEARTIFY_RECONNECT_INITIAL_MS") {
            self.reconnect.initial_delay_ms = v;
        }
        if let Some(v) = env_parse("HEARTIFY_RECONNECT_MAX_MS") {
            self.reconnect.max_delay_ms = v;
        }
        if let Some(v) = env_parse("HEARTIFY_RECONNECT_MULTIPLIER") {
            self.reconnect.multiplier = v;
        }
        if let Some(v) = env_parse("HEARTIFY_AGGREGATE_REFRESH_SECS") {
            self.aggregate_refresh_secs = v;
        }
        self.normalized()
    }

    /// Clamp values the pipeline cannot run with.
    pub fn normalized(mut self) -> Self {
        if self.connection_queue_capacity == 0 {
            log::warn!("connection_queue_capacity must be at least 1; using 1");
            self.connection_queue_capacity = 1;
        }
        if self.reconnect.multiplier == 0 {
            self.reconnect.multiplier = 1;
        }
        if self.reconnect.initial_delay_ms == 0 {
            self.reconnect.initial_delay_ms = 1;
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            log::warn!(
                "reconnect max delay {}ms is below initial delay {}ms; raising it",
                self.reconnect.max_delay_ms,
                self.reconnect.initial_delay_ms
            );
            self.reconnect.max_delay_ms = self.reconnect.initial_delay_ms;
        }
        self
    }
}

/// Process-level settings for `heartify-server`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub realtime: RealtimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            realtime: RealtimeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then `file`'s `[realtime]` section, then the environment.
    pub fn load(file: Option<&RepositoryConfig>) -> Self {
        let realtime = file
            .and_then(|c| c.realtime.clone())
            .unwrap_or_default()
            .with_env_overrides();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env_parse("PORT").unwrap_or(DEFAULT_PORT),
            realtime,
        }
    }

    pub fn from_env() -> Self {
        Self::load(None)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RealtimeConfig::default();
        assert_eq!(config.connection_queue_capacity, 64);
        assert!(config.legacy_broadcast);
        assert_eq!(config.reconnect.initial_delay(), Duration::from_millis(500));
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(30));
        assert_eq!(config.aggregate_refresh_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_normalized_fixes_unusable_values() {
        let config = RealtimeConfig {
            connection_queue_capacity: 0,
            reconnect: BackoffConfig {
                initial_delay_ms: 1000,
                max_delay_ms: 10,
                multiplier: 0,
            },
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.connection_queue_capacity, 1);
        assert_eq!(config.reconnect.multiplier, 1);
        assert_eq!(config.reconnect.max_delay_ms, 1000);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap().port(), 5000);
    }
}
