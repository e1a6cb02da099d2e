//! Shared mock connection and factory for pool integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use multidb_pool::{Connection, ConnectionFactory, StartupHook};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory connection with switchable health flags
pub struct MockConnection {
    pub id: usize,
    pub dbname: String,
    closed: AtomicBool,
    broken: AtomicBool,
    fail_close: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockConnection {
    fn new(id: usize, dbname: &str, fail_close: bool) -> Self {
        Self {
            id,
            dbname: dbname.to_string(),
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            fail_close: AtomicBool::new(fail_close),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn set_closed_by_peer(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            anyhow::bail!("close failed for {}", self.dbname);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that records every connection it hands out
#[derive(Default)]
pub struct MockFactory {
    counter: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    refuse: Mutex<HashSet<String>>,
    fail_close: Mutex<HashSet<String>>,
    opened: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn connects_to(&self, dbname: &str) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|conn| conn.dbname == dbname)
            .count()
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn refuse(&self, dbname: &str) {
        self.refuse.lock().insert(dbname.to_string());
    }

    pub fn fail_close(&self, dbname: &str) {
        self.fail_close.lock().insert(dbname.to_string());
    }

    /// Connections handed out so far, in order
    pub fn opened(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().clone()
    }
}

/// Handle given to the pool; shares its connections with the test's factory
pub struct SharedMockConnection(pub Arc<MockConnection>);

impl std::ops::Deref for SharedMockConnection {
    type Target = MockConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Connection for SharedMockConnection {
    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    fn is_broken(&self) -> bool {
        self.0.is_broken()
    }

    fn close(&self) -> anyhow::Result<()> {
        self.0.close()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = SharedMockConnection;

    async fn connect(&self, dbname: &str) -> anyhow::Result<Self::Connection> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.refuse.lock().contains(dbname) {
            anyhow::bail!("connection refused for {}", dbname);
        }

        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let fail_close = self.fail_close.lock().contains(dbname);
        let conn = Arc::new(MockConnection::new(id, dbname, fail_close));
        self.opened.lock().push(Arc::clone(&conn));
        Ok(SharedMockConnection(conn))
    }
}

/// Startup hook counting how often it ran
#[derive(Default)]
pub struct CountingStartup {
    pub runs: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl StartupHook<SharedMockConnection> for Arc<CountingStartup> {
    async fn run(&self, _conn: &SharedMockConnection) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("startup failed");
        }
        Ok(())
    }
}

impl CountingStartup {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

pub type TestPool = multidb_pool::MultiDatabasePool<SharedMockConnection>;

/// Pool backed by a fresh mock factory
pub fn pool_with(config: multidb_pool::PoolConfig) -> (TestPool, Arc<MockFactory>) {
    let factory = MockFactory::new();
    let pool = multidb_pool::MultiDatabasePool::new(config, Arc::clone(&factory));
    (pool, factory)
}
