use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(
        "Could not insert connection in pool size {max_connections} within {:.3} seconds",
        .timeout.as_secs_f64()
    )]
    PoolFull {
        max_connections: usize,
        timeout: Duration,
    },

    #[error(
        "Connection for database {dbname} stayed busy for {:.3} seconds",
        .timeout.as_secs_f64()
    )]
    KeyBusy { dbname: String, timeout: Duration },

    #[error("Failed to connect to database {dbname}: {source}")]
    Connect {
        dbname: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Startup hook failed for database {dbname}: {source}")]
    Startup {
        dbname: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operation on database {dbname} was cancelled")]
    Cancelled { dbname: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// True when admission gave up waiting for a free slot.
    pub fn is_pool_full(&self) -> bool {
        matches!(self, PoolError::PoolFull { .. })
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
