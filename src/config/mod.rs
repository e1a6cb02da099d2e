use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Database the pool's persistent main connection points at
    #[serde(default = "default_dbname")]
    pub dbname: String,
    /// Cap on open connections across all databases (unset = unbounded)
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Default admission wait when an acquire passes no timeout (milliseconds)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// TTL of the main connection (milliseconds)
    #[serde(default = "default_idle_connection_timeout_ms")]
    pub idle_connection_timeout_ms: u64,
    /// Sleep between admission retries (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Period of the background prune task (unset = prune only on acquire)
    #[serde(default)]
    pub prune_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

// Default values
fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_idle_connection_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dbname: default_dbname(),
            max_connections: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_connection_timeout_ms: default_idle_connection_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            prune_interval_ms: None,
        }
    }
}

/// Whole milliseconds, saturating for durations too large to store.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PoolConfig {
    pub fn new(dbname: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = millis(timeout);
        self
    }

    pub fn with_idle_connection_timeout(mut self, ttl: Duration) -> Self {
        self.idle_connection_timeout_ms = millis(ttl);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval_ms = Some(millis(interval));
        self
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_connection_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn prune_interval(&self) -> Option<Duration> {
        self.prune_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dbname.trim().is_empty() {
            return Err(PoolError::Config("pool.dbname cannot be empty".to_string()));
        }

        if self.max_connections == Some(0) {
            return Err(PoolError::Config(
                "pool.max_connections must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(PoolError::Config(
                "pool.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(PoolError::Config(format!(
                "Invalid log format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
dbname = "postgres"
# max_connections = 10  # Unset means no cap
connection_timeout_ms = 5000
idle_connection_timeout_ms = 60000
poll_interval_ms = 10
# prune_interval_ms = 30000  # Unset means prune only on acquire

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"
"#;

        std::fs::write(path.as_ref(), example)?;

        Ok(())
    }
}
