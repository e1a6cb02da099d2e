use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::connection::{Connection, ConnectionFactory};
use super::lease::{Disposal, Interruption, Lease, LeaseOptions};
#[cfg(feature = "metrics")]
use super::metrics::PoolMetrics;
use super::registry::{Lookup, Registry};
use super::stats::{PoolStats, StatsSnapshot};
use crate::config::PoolConfig;
use crate::utils::error::{PoolError, Result};

/// Why an acquire has to wait before trying again.
enum Wait {
    /// The key is held by another lease or being opened.
    KeyBusy,
    /// The pool is at capacity and nothing could be reclaimed.
    Full,
}

enum Admission<C> {
    Leased { connection: Arc<C>, generation: u64 },
    Reserved,
    Wait(Wait),
}

type DynFactory<C> = dyn ConnectionFactory<Connection = C>;

/// State shared between the pool handle, its leases and the pruning task.
pub(crate) struct Shared<C: Connection> {
    config: PoolConfig,
    factory: Box<DynFactory<C>>,
    registry: Mutex<Registry<C>>,
    stats: PoolStats,
    #[cfg(feature = "metrics")]
    metrics: Option<PoolMetrics>,
}

impl<C: Connection> Shared<C> {
    /// Apply the terminal outcome of a lease.
    pub(crate) fn settle(
        &self,
        dbname: &str,
        generation: u64,
        connection: &Arc<C>,
        disposal: Disposal,
    ) {
        let discard = match disposal {
            Disposal::Cancel => true,
            Disposal::Release => connection.is_broken() || connection.is_closed(),
        };

        if !discard {
            if self.registry.lock().mark_idle(dbname, generation) {
                trace!("Released connection for {} to idle", dbname);
            } else {
                trace!("Connection for {} left the pool while leased", dbname);
            }
            return;
        }

        let removed = self.registry.lock().remove_generation(dbname, generation);
        if let Some(connection) = removed {
            debug!(
                "Discarding connection for {} ({})",
                dbname,
                match disposal {
                    Disposal::Cancel => "lease cancelled",
                    Disposal::Release => "connection broken",
                }
            );
            self.close_connection(dbname, &connection);
        }
    }

    fn prune(&self) -> usize {
        let expired = self.registry.lock().take_expired(Instant::now());
        for (dbname, connection) in &expired {
            trace!("Pruning idle connection for {}", dbname);
            self.record_pruned();
            self.close_connection(dbname, connection);
        }
        if !expired.is_empty() {
            debug!("Pruned {} expired connections", expired.len());
        }
        expired.len()
    }

    fn evict_one(&self) -> Option<String> {
        let (dbname, connection) = self.registry.lock().take_lru()?;
        debug!("Evicted least recently used connection for {}", dbname);
        self.record_evicted();
        self.close_connection(&dbname, &connection);
        Some(dbname)
    }

    /// One admission attempt, entirely under the registry lock. Connections
    /// removed along the way are returned so they can be closed unlocked.
    fn try_admit(
        &self,
        dbname: &str,
        ttl: Duration,
        reclaimed: &mut Vec<Reclaimed<C>>,
    ) -> Admission<C> {
        let mut registry = self.registry.lock();
        let now = Instant::now();

        match registry.lease_existing(dbname, ttl, now) {
            Lookup::Granted {
                connection,
                generation,
            } => {
                return Admission::Leased {
                    connection,
                    generation,
                };
            }
            Lookup::Busy => return Admission::Wait(Wait::KeyBusy),
            Lookup::Vacant { stale: Some(stale) } => {
                reclaimed.push(Reclaimed::Stale(dbname.to_string(), stale));
            }
            Lookup::Vacant { stale: None } => {}
        }

        if let Some(max) = self.config.max_connections() {
            if registry.len() >= max {
                for (name, connection) in registry.take_expired(now) {
                    reclaimed.push(Reclaimed::Pruned(name, connection));
                }
            }
            if registry.len() >= max {
                if let Some((name, connection)) = registry.take_lru() {
                    reclaimed.push(Reclaimed::Evicted(name, connection));
                }
            }
            if registry.len() >= max {
                return Admission::Wait(Wait::Full);
            }
        }

        registry.reserve(dbname);
        Admission::Reserved
    }

    fn close_reclaimed(&self, reclaimed: &mut Vec<Reclaimed<C>>) {
        for entry in reclaimed.drain(..) {
            match entry {
                Reclaimed::Stale(dbname, connection) => {
                    debug!("Replacing closed or broken connection for {}", dbname);
                    self.close_connection(&dbname, &connection);
                }
                Reclaimed::Pruned(dbname, connection) => {
                    trace!("Pruning idle connection for {}", dbname);
                    self.record_pruned();
                    self.close_connection(&dbname, &connection);
                }
                Reclaimed::Evicted(dbname, connection) => {
                    debug!("Evicted least recently used connection for {}", dbname);
                    self.record_evicted();
                    self.close_connection(&dbname, &connection);
                }
            }
        }
    }

    /// Close a connection that has already left the registry. Failures are
    /// counted and logged, never returned.
    fn close_connection(&self, dbname: &str, connection: &C) -> bool {
        let success = match connection.close() {
            Ok(()) => {
                self.stats.record_closed();
                true
            }
            Err(err) => {
                self.stats.record_close_failed();
                error!("Failed to close DB connection for db={}: {:#}", dbname, err);
                false
            }
        };
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_closed(success);
        }
        success
    }

    fn record_opened(&self) {
        self.stats.record_opened();
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_opened();
        }
    }

    fn record_pruned(&self) {
        self.stats.record_pruned();
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_pruned();
        }
    }

    fn record_evicted(&self) {
        self.stats.record_evicted();
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_evicted();
        }
    }
}

enum Reclaimed<C> {
    Stale(String, Arc<C>),
    Pruned(String, Arc<C>),
    Evicted(String, Arc<C>),
}

/// Releases a key reservation if opening does not complete, closing the
/// connection if one was already obtained.
struct OpeningGuard<'a, C: Connection> {
    shared: &'a Shared<C>,
    dbname: &'a str,
    connection: Option<Arc<C>>,
    armed: bool,
}

impl<'a, C: Connection> OpeningGuard<'a, C> {
    fn new(shared: &'a Shared<C>, dbname: &'a str) -> Self {
        Self {
            shared,
            dbname,
            connection: None,
            armed: true,
        }
    }

    fn opened(&mut self, connection: Arc<C>) {
        self.connection = Some(connection);
    }

    /// Publish the opened connection as a busy record.
    fn complete(mut self, connection: Arc<C>, ttl: Duration, persistent: bool) -> u64 {
        self.connection = None;
        self.armed = false;

        let (generation, displaced) = self.shared.registry.lock().fill(
            self.dbname,
            connection,
            ttl,
            persistent,
            Instant::now(),
        );
        if let Some(displaced) = displaced {
            self.shared.close_connection(self.dbname, &displaced);
        }
        generation
    }
}

impl<C: Connection> Drop for OpeningGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.registry.lock().cancel_reservation(self.dbname);
        if let Some(connection) = self.connection.take() {
            self.shared.close_connection(self.dbname, &connection);
        }
    }
}

/// Connection pool spanning many logical databases with at most one
/// connection each.
///
/// Idle connections are pruned once their TTL elapses. When
/// `max_connections` is set, opening a new connection waits until a slot is
/// free, pruning and evicting the least recently used idle connection to
/// make room. Cloning the pool is cheap and every clone shares the same
/// registry.
pub struct MultiDatabasePool<C: Connection> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection> Clone for MultiDatabasePool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> MultiDatabasePool<C> {
    /// Create a pool around `factory`.
    ///
    /// If the configuration sets a prune interval and a tokio runtime is
    /// available, a background pruning task is started.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: ConnectionFactory<Connection = C>,
    {
        #[cfg(feature = "metrics")]
        let metrics = match PoolMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!("Pool metrics disabled: {}", err);
                None
            }
        };

        let pool = Self {
            shared: Arc::new(Shared {
                config,
                factory: Box::new(factory),
                registry: Mutex::new(Registry::new()),
                stats: PoolStats::new(),
                #[cfg(feature = "metrics")]
                metrics,
            }),
        };

        if let Some(every) = pool.shared.config.prune_interval() {
            if tokio::runtime::Handle::try_current().is_ok() {
                pool.spawn_pruner(every);
            } else {
                warn!("No tokio runtime available, periodic pruning not started");
            }
        }

        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Check out the connection for `dbname`, opening it if needed.
    ///
    /// An idle, healthy connection is reused and its TTL refreshed. A
    /// connection leased by someone else is never shared; the call waits for
    /// it instead. Opening a new connection is subject to admission control.
    pub async fn acquire(
        &self,
        dbname: &str,
        ttl: Duration,
        options: LeaseOptions<C>,
    ) -> Result<Lease<C>> {
        let shared = &self.shared;
        let timeout = options
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or_else(|| shared.config.connection_timeout());
        let poll_interval = shared.config.poll_interval();
        let start = Instant::now();
        let mut reclaimed = Vec::new();
        let mut waited = false;

        shared.prune();

        loop {
            let admission = shared.try_admit(dbname, ttl, &mut reclaimed);
            shared.close_reclaimed(&mut reclaimed);

            let wait = match admission {
                Admission::Leased {
                    connection,
                    generation,
                } => {
                    trace!("Reusing pooled connection for {}", dbname);
                    return Ok(Lease::new(
                        Arc::clone(shared),
                        dbname.to_string(),
                        generation,
                        connection,
                    ));
                }
                Admission::Reserved => break,
                Admission::Wait(wait) => wait,
            };

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(match wait {
                    Wait::Full => {
                        let max_connections =
                            shared.config.max_connections().unwrap_or_default();
                        warn!(
                            "Pool full ({} connections), gave up opening {} after {:?}",
                            max_connections, dbname, elapsed
                        );
                        PoolError::PoolFull {
                            max_connections,
                            timeout,
                        }
                    }
                    Wait::KeyBusy => PoolError::KeyBusy {
                        dbname: dbname.to_string(),
                        timeout,
                    },
                });
            }

            if !waited {
                waited = true;
                debug!(
                    "Waiting for {} ({})",
                    dbname,
                    match wait {
                        Wait::Full => "pool full",
                        Wait::KeyBusy => "connection busy",
                    }
                );
            }
            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        }

        self.open(dbname, ttl, options).await
    }

    /// Open a connection for a key this caller has reserved.
    async fn open(
        &self,
        dbname: &str,
        ttl: Duration,
        options: LeaseOptions<C>,
    ) -> Result<Lease<C>> {
        let shared = &self.shared;
        let mut guard = OpeningGuard::new(shared, dbname);

        debug!("Opening new connection for {}", dbname);
        let connection = shared
            .factory
            .connect(dbname)
            .await
            .map_err(|source| PoolError::Connect {
                dbname: dbname.to_string(),
                source,
            })?;
        let connection = Arc::new(connection);
        shared.record_opened();
        guard.opened(Arc::clone(&connection));

        if let Some(startup) = &options.startup {
            startup
                .run(&connection)
                .await
                .map_err(|source| PoolError::Startup {
                    dbname: dbname.to_string(),
                    source,
                })?;
        }

        let generation = guard.complete(Arc::clone(&connection), ttl, options.persistent);

        Ok(Lease::new(
            Arc::clone(shared),
            dbname.to_string(),
            generation,
            connection,
        ))
    }

    /// Run `body` with the connection for `dbname` and settle the lease on
    /// every exit path.
    ///
    /// An `Err` that reports itself as an interruption discards the
    /// connection; any other outcome returns it to idle unless it is broken.
    /// If the returned future is dropped or `body` panics, the connection is
    /// discarded as well.
    pub async fn with_connection<T, E, F, Fut>(
        &self,
        dbname: &str,
        ttl: Duration,
        options: LeaseOptions<C>,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<PoolError> + Interruption,
    {
        let lease = self.acquire(dbname, ttl, options).await?;
        let result = body(Arc::clone(lease.connection())).await;

        match &result {
            Err(err) if err.is_interruption() => lease.cancel(),
            _ => lease.release(),
        }
        result
    }

    /// Lease the pool's own database connection.
    ///
    /// It is persistent: pruning and eviction never remove it, only
    /// [`close_all`](Self::close_all) does.
    pub async fn main_connection(&self) -> Result<Lease<C>> {
        let config = &self.shared.config;
        self.acquire(
            config.dbname(),
            config.idle_connection_timeout(),
            LeaseOptions::new().persistent(true),
        )
        .await
    }

    /// Scoped form of [`main_connection`](Self::main_connection).
    pub async fn get_main_connection<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<PoolError> + Interruption,
    {
        let config = &self.shared.config;
        self.with_connection(
            config.dbname(),
            config.idle_connection_timeout(),
            LeaseOptions::new().persistent(true),
            body,
        )
        .await
    }

    /// Close every idle, non-persistent connection whose TTL has elapsed.
    ///
    /// Returns how many were pruned.
    pub fn prune(&self) -> usize {
        self.shared.prune()
    }

    /// Close the least recently used idle, non-persistent connection.
    pub fn evict_one(&self) -> Option<String> {
        self.shared.evict_one()
    }

    /// Close every tracked connection, busy and persistent ones included.
    ///
    /// Returns false if any close failed; the rest are still attempted.
    pub fn close_all(&self) -> bool {
        let drained = self.shared.registry.lock().drain_open();
        let count = drained.len();

        let mut success = true;
        for (dbname, connection) in &drained {
            if !self.shared.close_connection(dbname, connection) {
                success = false;
            }
        }

        debug!("Closed {} connections (all succeeded: {})", count, success);
        success
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.shared.stats.reset();
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&PoolMetrics> {
        self.shared.metrics.as_ref()
    }

    /// Tracked keys, including ones still being opened.
    pub fn len(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, dbname: &str) -> bool {
        self.shared.registry.lock().contains(dbname)
    }

    /// Whether the connection for `dbname` is currently leased, or `None`
    /// if no open connection is tracked for it.
    pub fn is_busy(&self, dbname: &str) -> Option<bool> {
        self.shared
            .registry
            .lock()
            .record(dbname)
            .map(|record| record.busy)
    }

    /// Whether the connection for `dbname` is exempt from pruning and
    /// eviction.
    pub fn is_persistent(&self, dbname: &str) -> Option<bool> {
        self.shared
            .registry
            .lock()
            .record(dbname)
            .map(|record| record.persistent)
    }

    /// Prune on a fixed interval until the pool is dropped.
    pub fn spawn_pruner(&self, every: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared<C>> = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    trace!("Pool dropped, stopping periodic pruning");
                    break;
                };
                shared.prune();
            }
        })
    }
}
