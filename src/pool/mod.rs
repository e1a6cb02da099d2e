//! Multi-database connection pool
//!
//! Holds at most one connection per logical database, caps the total number
//! of open connections, prunes idle connections whose TTL has elapsed and
//! evicts the least recently used idle connection when the cap is reached.
//!
//! # Example
//!
//! ```ignore
//! use multidb_pool::pool::{LeaseOptions, MultiDatabasePool};
//! use multidb_pool::config::PoolConfig;
//!
//! let config = PoolConfig::new("postgres").with_max_connections(10);
//! let pool = MultiDatabasePool::new(config, factory);
//!
//! let rows = pool
//!     .with_connection("orders", Duration::from_secs(60), LeaseOptions::new(), |conn| async move {
//!         conn.query("SELECT 1").await
//!     })
//!     .await?;
//! ```

pub mod connection;
mod lease;
mod manager;
#[cfg(feature = "metrics")]
pub mod metrics;
mod registry;
mod stats;

pub use connection::{Connection, ConnectionFactory, StartupHook};
pub use lease::{Interruption, Lease, LeaseOptions};
pub use manager::MultiDatabasePool;
#[cfg(feature = "metrics")]
pub use metrics::PoolMetrics;
pub use stats::{PoolStats, StatsSnapshot};
