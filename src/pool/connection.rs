//! Capabilities the pool consumes from its environment
//!
//! The pool never talks to a database itself. It asks a [`ConnectionFactory`]
//! for a live handle, optionally runs a [`StartupHook`] on it once, and later
//! inspects and closes it through the [`Connection`] trait.

use async_trait::async_trait;

/// A live database handle managed by the pool.
pub trait Connection: Send + Sync + 'static {
    /// The handle was closed, by the pool or by the peer.
    fn is_closed(&self) -> bool;

    /// The handle reports itself unusable without having been closed.
    fn is_broken(&self) -> bool;

    /// Close the underlying connection.
    fn close(&self) -> anyhow::Result<()>;
}

/// Opens a new connection given a database identifier.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self, dbname: &str) -> anyhow::Result<Self::Connection>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for std::sync::Arc<T> {
    type Connection = T::Connection;

    async fn connect(&self, dbname: &str) -> anyhow::Result<Self::Connection> {
        (**self).connect(dbname).await
    }
}

/// Runs once on every freshly opened connection before first use.
#[async_trait]
pub trait StartupHook<C: Connection>: Send + Sync {
    async fn run(&self, conn: &C) -> anyhow::Result<()>;
}

