//! Pool usage counters
//!
//! Counters only grow until [`PoolStats::reset`] is called. They are for
//! observability; nothing in the pool reads them to make decisions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every operation on a pool.
#[derive(Debug)]
pub struct PoolStats {
    connection_opened: AtomicU64,
    connection_pruned: AtomicU64,
    connection_evicted: AtomicU64,
    connection_closed: AtomicU64,
    connection_closed_failed: AtomicU64,
    since: Mutex<DateTime<Utc>>,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            connection_opened: AtomicU64::new(0),
            connection_pruned: AtomicU64::new(0),
            connection_evicted: AtomicU64::new(0),
            connection_closed: AtomicU64::new(0),
            connection_closed_failed: AtomicU64::new(0),
            since: Mutex::new(Utc::now()),
        }
    }

    #[inline]
    pub fn record_opened(&self) {
        self.connection_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pruned(&self) {
        self.connection_pruned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evicted(&self) {
        self.connection_evicted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_closed(&self) {
        self.connection_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_close_failed(&self) {
        self.connection_closed_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connection_opened: self.connection_opened.load(Ordering::Relaxed),
            connection_pruned: self.connection_pruned.load(Ordering::Relaxed),
            connection_evicted: self.connection_evicted.load(Ordering::Relaxed),
            connection_closed: self.connection_closed.load(Ordering::Relaxed),
            connection_closed_failed: self.connection_closed_failed.load(Ordering::Relaxed),
            since: *self.since.lock(),
        }
    }

    /// Zero every counter and restart the observation window.
    pub fn reset(&self) {
        let mut since = self.since.lock();
        self.connection_opened.store(0, Ordering::Relaxed);
        self.connection_pruned.store(0, Ordering::Relaxed);
        self.connection_evicted.store(0, Ordering::Relaxed);
        self.connection_closed.store(0, Ordering::Relaxed);
        self.connection_closed_failed.store(0, Ordering::Relaxed);
        *since = Utc::now();
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connection_opened: u64,
    pub connection_pruned: u64,
    pub connection_evicted: u64,
    pub connection_closed: u64,
    pub connection_closed_failed: u64,
    /// Start of the window these counters cover.
    pub since: DateTime<Utc>,
}
