//! Scoped access to a pooled connection
//!
//! A [`Lease`] ends in exactly one of three ways: released idle, discarded
//! because the connection reports itself broken, or discarded because the
//! holder was cancelled. Dropping a lease without calling [`Lease::release`]
//! counts as cancellation, which covers panics, early returns and futures
//! dropped mid-await.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::connection::{Connection, StartupHook};
use super::manager::Shared;
use crate::utils::error::PoolError;

/// How a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposal {
    /// Normal exit. The connection goes back to idle unless it is broken.
    Release,
    /// Abrupt exit. The connection is always removed and closed.
    Cancel,
}

/// Tells the pool whether an error raised inside a lease scope means the
/// surrounding operation was cancelled rather than merely failed.
pub trait Interruption {
    fn is_interruption(&self) -> bool;
}

impl Interruption for PoolError {
    fn is_interruption(&self) -> bool {
        matches!(self, PoolError::Cancelled { .. })
    }
}

impl Interruption for anyhow::Error {
    fn is_interruption(&self) -> bool {
        self.downcast_ref::<PoolError>()
            .is_some_and(PoolError::is_interruption)
    }
}

/// Per-acquire settings.
pub struct LeaseOptions<C: Connection> {
    pub(crate) timeout: Option<Duration>,
    pub(crate) startup: Option<Arc<dyn StartupHook<C>>>,
    pub(crate) persistent: bool,
}

impl<C: Connection> LeaseOptions<C> {
    pub fn new() -> Self {
        Self {
            timeout: None,
            startup: None,
            persistent: false,
        }
    }

    /// How long admission may wait for a free slot. Unset or zero means the
    /// pool's connection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Hook run once on a newly opened connection. Not run on reuse.
    pub fn with_startup<H: StartupHook<C> + 'static>(mut self, hook: H) -> Self {
        self.startup = Some(Arc::new(hook));
        self
    }

    pub fn with_shared_startup(mut self, hook: Arc<dyn StartupHook<C>>) -> Self {
        self.startup = Some(hook);
        self
    }

    /// Exempt a newly opened record from pruning and eviction. Ignored when
    /// an existing record is reused.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

impl<C: Connection> Default for LeaseOptions<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Clone for LeaseOptions<C> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            startup: self.startup.clone(),
            persistent: self.persistent,
        }
    }
}

impl<C: Connection> fmt::Debug for LeaseOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseOptions")
            .field("timeout", &self.timeout)
            .field("startup", &self.startup.is_some())
            .field("persistent", &self.persistent)
            .finish()
    }
}

/// A connection checked out of the pool.
pub struct Lease<C: Connection> {
    shared: Arc<Shared<C>>,
    dbname: String,
    generation: u64,
    connection: Arc<C>,
    settled: bool,
}

impl<C: Connection> Lease<C> {
    pub(crate) fn new(
        shared: Arc<Shared<C>>,
        dbname: String,
        generation: u64,
        connection: Arc<C>,
    ) -> Self {
        Self {
            shared,
            dbname,
            generation,
            connection,
            settled: false,
        }
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// The leased handle. Clones must not outlive the lease.
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        self.settle(Disposal::Release);
    }

    /// Remove and close the connection; its protocol state can't be trusted.
    pub fn cancel(mut self) {
        self.settle(Disposal::Cancel);
    }

    fn settle(&mut self, disposal: Disposal) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.shared
            .settle(&self.dbname, self.generation, &self.connection, disposal);
    }
}

impl<C: Connection> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<C: Connection> Drop for Lease<C> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                "Lease for {} dropped without release, discarding connection",
                self.dbname
            );
            self.settle(Disposal::Cancel);
        }
    }
}

impl<C: Connection> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("dbname", &self.dbname)
            .field("generation", &self.generation)
            .field("settled", &self.settled)
            .finish()
    }
}
