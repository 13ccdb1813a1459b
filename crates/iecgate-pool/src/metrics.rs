//! Metrics Collection
//!
//! Counters and gauges for the connection pool:
//! - Activations and failovers of the active session
//! - Sessions entering `FatalError`
//! - Session counts per state, refreshed by the monitor
//! - Prometheus export

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::pool::PoolStats;

/// Pool metrics collector
#[derive(Debug)]
pub struct PoolMetrics {
    activations: AtomicU64,
    failovers: AtomicU64,
    fatal_sessions: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "pool_activations_total",
            "Times a session became the active session"
        );
        describe_counter!(
            "pool_failovers_total",
            "Times the active role moved from one session to another"
        );
        describe_counter!(
            "pool_sessions_fatal_total",
            "Sessions that stopped retrying after a fatal error"
        );
        describe_gauge!("pool_sessions_total", "Configured sessions");
        describe_gauge!("pool_sessions_connected", "Sessions in Connected state");
        describe_gauge!("pool_sessions_fatal", "Sessions in FatalError state");
        describe_gauge!(
            "pool_active_session",
            "Index of the active session, -1 when none"
        );

        Self {
            activations: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            fatal_sessions: AtomicU64::new(0),
        }
    }

    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
        counter!("pool_activations_total").increment(1);
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
        counter!("pool_failovers_total").increment(1);
    }

    pub fn record_fatal_session(&self) {
        self.fatal_sessions.fetch_add(1, Ordering::Relaxed);
        counter!("pool_sessions_fatal_total").increment(1);
    }

    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn failovers(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    pub fn fatal_sessions(&self) -> u64 {
        self.fatal_sessions.load(Ordering::Relaxed)
    }

    /// Update gauge metrics (called on every monitor tick)
    pub fn update_gauges(&self, stats: &PoolStats) {
        gauge!("pool_sessions_total").set(stats.total_sessions as f64);
        gauge!("pool_sessions_connected").set(stats.connected_sessions as f64);
        gauge!("pool_sessions_fatal").set(stats.fatal_sessions as f64);
        gauge!("pool_active_session").set(stats.active.map_or(-1.0, |id| id.0 as f64));
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global Prometheus recorder with its own HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn install_exporter(bind_address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()?;

    info!(
        bind_address = %bind_address,
        "Prometheus metrics HTTP server started"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iecgate_core::SessionId;

    #[test]
    fn test_pool_metrics() {
        let metrics = PoolMetrics::new();

        metrics.record_activation();
        metrics.record_activation();
        metrics.record_failover();

        assert_eq!(metrics.activations(), 2);
        assert_eq!(metrics.failovers(), 1);
        assert_eq!(metrics.fatal_sessions(), 0);
    }

    #[test]
    fn test_update_gauges_without_recorder() {
        let metrics = PoolMetrics::new();
        metrics.update_gauges(&PoolStats {
            total_sessions: 2,
            connected_sessions: 1,
            connecting_sessions: 0,
            fatal_sessions: 0,
            active: Some(SessionId(1)),
        });
    }
}
