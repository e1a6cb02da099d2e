/// Scoped Lease Tests
///
/// Every exit path of a lease scope ends in exactly one terminal outcome

mod common;

use common::pool_with;
use multidb_pool::{LeaseOptions, PoolConfig, PoolError};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn normal_exit_returns_connection_to_idle() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let id = pool
        .with_connection("orders", TTL, LeaseOptions::new(), |conn| async move {
            Ok::<_, PoolError>(conn.id)
        })
        .await
        .unwrap();

    assert_eq!(id, 0);
    assert_eq!(pool.is_busy("orders"), Some(false));
    assert_eq!(factory.opened()[0].close_calls(), 0);
}

#[tokio::test]
async fn ordinary_failure_keeps_healthy_connection() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let result: anyhow::Result<()> = pool
        .with_connection("orders", TTL, LeaseOptions::new(), |_conn| async move {
            Err(anyhow::anyhow!("query failed"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(pool.is_busy("orders"), Some(false));
    assert_eq!(factory.opened()[0].close_calls(), 0);
}

#[tokio::test]
async fn failure_on_broken_connection_discards_it() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let result: anyhow::Result<()> = pool
        .with_connection("orders", TTL, LeaseOptions::new(), |conn| async move {
            conn.set_broken();
            Err(anyhow::anyhow!("server closed the connection unexpectedly"))
        })
        .await;

    assert!(result.is_err());
    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test]
async fn cancellation_removes_connection_and_is_reraised() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let err = pool
        .with_connection("orders", TTL, LeaseOptions::new(), |_conn| async move {
            Err::<(), _>(PoolError::Cancelled {
                dbname: "orders".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Cancelled { .. }));
    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
    assert_eq!(pool.stats().connection_closed, 1);
}

#[tokio::test]
async fn anyhow_wrapped_cancellation_is_honoured() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let result: anyhow::Result<()> = pool
        .with_connection("orders", TTL, LeaseOptions::new(), |_conn| async move {
            Err(PoolError::Cancelled {
                dbname: "orders".to_string(),
            }
            .into())
        })
        .await;

    assert!(result.is_err());
    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_scope_future_discards_connection() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let scope = pool.with_connection("orders", TTL, LeaseOptions::new(), |_conn| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, PoolError>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(50), scope).await;

    assert!(timed_out.is_err());
    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test]
async fn panicking_scope_discards_connection() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let task = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.with_connection("orders", TTL, LeaseOptions::new(), |_conn| async move {
                if true {
                    panic!("body blew up");
                }
                Ok::<_, PoolError>(())
            })
            .await
        })
    };

    assert!(task.await.unwrap_err().is_panic());
    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test]
async fn dropped_lease_counts_as_cancellation() {
    let (pool, factory) = pool_with(PoolConfig::default());

    {
        let _lease = pool.acquire("orders", TTL, LeaseOptions::new()).await.unwrap();
    }

    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test]
async fn explicit_cancel_discards_healthy_connection() {
    let (pool, factory) = pool_with(PoolConfig::default());

    let lease = pool.acquire("orders", TTL, LeaseOptions::new()).await.unwrap();
    assert_eq!(lease.dbname(), "orders");
    lease.cancel();

    assert!(!pool.contains("orders"));
    assert_eq!(factory.opened()[0].close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_open_releases_reservation() {
    let (pool, factory) = pool_with(PoolConfig::default().with_max_connections(1));
    factory.set_connect_delay(Duration::from_secs(5));

    let opening = pool.acquire("slow", TTL, LeaseOptions::new());
    assert!(tokio::time::timeout(Duration::from_millis(10), opening)
        .await
        .is_err());
    assert!(!pool.contains("slow"));

    factory.set_connect_delay(Duration::ZERO);
    pool.acquire("fast", TTL, LeaseOptions::new()).await.unwrap().release();
    assert!(pool.contains("fast"));
}

#[tokio::test]
async fn main_connection_is_persistent() {
    let config = PoolConfig::new("datadog").with_idle_connection_timeout(Duration::from_millis(1));
    let (pool, factory) = pool_with(config);

    let dbname = pool
        .get_main_connection(|conn| async move { Ok::<_, PoolError>(conn.dbname.clone()) })
        .await
        .unwrap();
    assert_eq!(dbname, "datadog");
    assert_eq!(pool.is_persistent("datadog"), Some(true));

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(pool.prune(), 0);
    assert_eq!(pool.evict_one(), None);

    let lease = pool.main_connection().await.unwrap();
    assert_eq!(factory.connects(), 1);
    lease.release();

    assert!(pool.close_all());
    assert!(!pool.contains("datadog"));
}
