use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus view of one pool, registered in a registry the pool owns.
#[derive(Clone)]
pub struct PoolMetrics {
    registry: Registry,
    opened: IntCounter,
    pruned: IntCounter,
    evicted: IntCounter,
    closed: IntCounter,
    closed_failed: IntCounter,
    open_connections: IntGauge,
}

impl PoolMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let opened = counter(
            &registry,
            "multidb_pool_connections_opened_total",
            "Connections opened through the connection factory",
        )?;
        let pruned = counter(
            &registry,
            "multidb_pool_connections_pruned_total",
            "Idle connections removed after their TTL elapsed",
        )?;
        let evicted = counter(
            &registry,
            "multidb_pool_connections_evicted_total",
            "Idle connections removed by LRU eviction to make room",
        )?;
        let closed = counter(
            &registry,
            "multidb_pool_connections_closed_total",
            "Connections closed successfully",
        )?;
        let closed_failed = counter(
            &registry,
            "multidb_pool_connections_closed_failed_total",
            "Connections whose close call failed",
        )?;
        let open_connections = IntGauge::with_opts(Opts::new(
            "multidb_pool_open_connections",
            "Connections currently tracked by the pool",
        ))?;
        registry.register(Box::new(open_connections.clone()))?;

        Ok(Self {
            registry,
            opened,
            pruned,
            evicted,
            closed,
            closed_failed,
            open_connections,
        })
    }

    #[inline]
    pub fn record_opened(&self) {
        self.opened.inc();
        self.open_connections.inc();
    }

    #[inline]
    pub fn record_pruned(&self) {
        self.pruned.inc();
    }

    #[inline]
    pub fn record_evicted(&self) {
        self.evicted.inc();
    }

    #[inline]
    pub fn record_closed(&self, success: bool) {
        if success {
            self.closed.inc();
        } else {
            self.closed_failed.inc();
        }
        self.open_connections.dec();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the text exposition format.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}
