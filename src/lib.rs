// multidb-pool - Bounded multi-database connection pool

pub mod check;
pub mod config;
pub mod pool;
pub mod telemetry;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, LoggingConfig, PoolConfig};
pub use pool::{
    Connection, ConnectionFactory, Interruption, Lease, LeaseOptions, MultiDatabasePool,
    StartupHook, StatsSnapshot,
};
pub use utils::error::{PoolError, Result};
