//! Monitoring Loop
//!
//! Periodic supervision of the pool. Each tick requests a connection on idle
//! sessions, re-runs the election and refreshes the pool gauges. Ticks run
//! sequentially on one task and only post non-blocking requests.

use iecgate_client::ConnectionState;
use iecgate_core::SessionId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pool::ConnectionPool;

/// Per-loop bookkeeping
#[derive(Debug, Default)]
pub struct PoolMonitor {
    /// Sessions already reported as fatal
    fatal_reported: HashSet<SessionId>,
}

impl PoolMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// One supervision cycle
    pub fn tick(&mut self, pool: &ConnectionPool) {
        for session in pool.sessions() {
            let snapshot = session.snapshot();
            match snapshot.state {
                ConnectionState::Idle => {
                    debug!(session = %snapshot.id, "Requesting connection on idle session");
                    session.connect();
                }
                ConnectionState::FatalError => {
                    if self.fatal_reported.insert(snapshot.id) {
                        pool.metrics().record_fatal_session();
                        error!(
                            session = %snapshot.id,
                            endpoint = %snapshot.endpoint,
                            error = snapshot.last_error.as_deref().unwrap_or("unknown"),
                            "Session failed permanently and is excluded from election"
                        );
                    }
                }
                _ => {}
            }
        }

        pool.elect();
        pool.metrics().update_gauges(&pool.stats());
    }
}

/// Running monitor task
pub(crate) struct MonitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn spawn(pool: Arc<ConnectionPool>, period: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            info!("Pool monitor started");

            let mut monitor = PoolMonitor::new();
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => monitor.tick(&pool),
                }
            }

            info!("Pool monitor stopped");
        });

        Self { shutdown, task }
    }

    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Pool monitor ended abnormally");
        }
    }
}
