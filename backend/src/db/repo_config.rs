//! Repository configuration file support.
//!
//! `repository.toml` selects the store backend and, optionally, carries the
//! `[realtime]` settings for the change pipeline:
//!
//! ```toml
//! [repository]
//! type = "postgres"
//!
//! [postgres]
//! database_url = "postgres://heartify@localhost/heartify"
//! feed_poll_interval_ms = 250
//!
//! [realtime]
//! connection_queue_capacity = 128
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::factory::RepositoryType;
use super::repository::{ErrorContext, RepositoryError};
use crate::config::RealtimeConfig;
use crate::db::PostgresConfig;

/// Repository configuration from file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub repository: RepositorySettings,
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub realtime: Option<RealtimeConfig>,
}

/// Repository type settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(rename = "type")]
    pub repo_type: String,
}

/// Postgres connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_feed_poll_interval_ms")]
    pub feed_poll_interval_ms: u64,
    /// Outbox rows older than this are deleted by the feed.
    #[serde(default = "default_feed_retention_secs")]
    pub feed_retention_secs: u64,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            feed_poll_interval_ms: default_feed_poll_interval_ms(),
            feed_retention_secs: default_feed_retention_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_feed_poll_interval_ms() -> u64 {
    500
}

fn default_feed_retention_secs() -> u64 {
    3600
}

fn config_error(message: String, operation: &str) -> RepositoryError {
    RepositoryError::ConfigurationError {
        message,
        context: ErrorContext::new(operation).with_entity("repository_config"),
    }
}

impl RepositoryConfig {
    /// Load repository configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            config_error(
                format!("Failed to read config file {}: {}", path.as_ref().display(), e),
                "read_config",
            )
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RepositoryError> {
        toml::from_str(content)
            .map_err(|e| config_error(format!("Failed to parse config file: {}", e), "parse_config"))
    }

    /// Load repository configuration from the default location.
    ///
    /// Searches for `repository.toml` in:
    /// 1. Current directory
    /// 2. `backend/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> Result<Self, RepositoryError> {
        Self::find_default_path()
            .map(Self::from_file)
            .unwrap_or_else(|| {
                Err(config_error(
                    "No repository.toml found in standard locations".to_string(),
                    "find_config",
                ))
            })
    }

    /// First existing `repository.toml` among the standard locations.
    pub fn find_default_path() -> Option<PathBuf> {
        [
            PathBuf::from("repository.toml"),
            PathBuf::from("backend/repository.toml"),
            PathBuf::from("../repository.toml"),
        ]
        .into_iter()
        .find(|path| path.exists())
    }

    /// Get the repository type from configuration.
    pub fn repository_type(&self) -> Result<RepositoryType, String> {
        RepositoryType::from_str(&self.repository.repo_type)
    }

    /// Convert to PostgresConfig if this is a Postgres configuration.
    #[cfg(feature = "postgres-repo")]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, RepositoryError> {
        let repo_type = self.repository_type().map_err(|e| {
            config_error(format!("Invalid repository type: {}", e), "to_postgres_config")
        })?;

        if repo_type != RepositoryType::Postgres {
            return Ok(None);
        }

        if self.postgres.database_url.is_empty() {
            return Err(config_error(
                "Postgres repository requires 'postgres.database_url' setting".to_string(),
                "to_postgres_config",
            ));
        }

        Ok(Some(PostgresConfig {
            database_url: self.postgres.database_url.clone(),
            max_pool_size: self.postgres.max_connections,
            min_pool_size: self.postgres.min_connections,
            connection_timeout_sec: self.postgres.connect_timeout,
            idle_timeout_sec: self.postgres.idle_timeout,
            max_retries: self.postgres.max_retries,
            retry_delay_ms: self.postgres.retry_delay_ms,
            feed_poll_interval_ms: self.postgres.feed_poll_interval_ms,
            feed_retention_secs: self.postgres.feed_retention_secs,
            ..PostgresConfig::default()
        }))
    }

    /// Convert to PostgresConfig when the feature is disabled.
    #[cfg(not(feature = "postgres-repo"))]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, RepositoryError> {
        let repo_type = self.repository_type().map_err(|e| {
            config_error(format!("Invalid repository type: {}", e), "to_postgres_config")
        })?;

        if repo_type == RepositoryType::Postgres {
            return Err(config_error(
                "Postgres repository feature not enabled".to_string(),
                "to_postgres_config",
            ));
        }

        Ok(None)
    }
}
