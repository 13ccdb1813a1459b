//! Connection Pool / Failover Coordinator
//!
//! Owns the ordered sessions towards one IED and designates at most one of
//! them as active. The election is sticky: a connected active session keeps
//! its role even when a higher-priority endpoint comes back.

use flume::{Receiver, Sender};
use iecgate_client::{
    ConnectionSession, IedConnection, IedConnector, SessionConfig, SessionEvent, SessionSnapshot,
};
use iecgate_core::config::TunablesConfig;
use iecgate_core::error::PoolError;
use iecgate_core::{ConnectionEndpoint, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::metrics::PoolMetrics;
use crate::monitor::MonitorHandle;

/// Change of the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// The session became the active one
    Activated { session: SessionId },
    /// The session lost the active role
    Deactivated { session: SessionId },
}

/// Configuration for connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Period of the monitoring loop
    pub monitoring_period: Duration,
    /// Timing of every session task
    pub session: SessionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            monitoring_period: Duration::from_millis(500),
            session: SessionConfig::default(),
        }
    }
}

impl From<&TunablesConfig> for PoolConfig {
    fn from(tunables: &TunablesConfig) -> Self {
        Self {
            monitoring_period: tunables.monitoring_period(),
            session: SessionConfig::from(tunables),
        }
    }
}

/// Redundant sessions plus the active selection
pub struct ConnectionPool {
    /// Sessions in priority order, `SessionId(i)` is `sessions[i]`
    sessions: Vec<Arc<ConnectionSession>>,
    /// The active session
    active: Mutex<Option<SessionId>>,
    config: PoolConfig,
    metrics: Arc<PoolMetrics>,
    events_tx: Sender<PoolEvent>,
    events_rx: Receiver<PoolEvent>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ConnectionPool {
    /// Build one session per endpoint. Session events go to `session_events`.
    pub fn new(
        endpoints: Vec<ConnectionEndpoint>,
        config: PoolConfig,
        connector: Arc<dyn IedConnector>,
        session_events: UnboundedSender<SessionEvent>,
    ) -> Result<Self, PoolError> {
        if endpoints.is_empty() {
            return Err(PoolError::NoEndpoints);
        }

        let sessions = endpoints
            .into_iter()
            .enumerate()
            .map(|(index, endpoint)| {
                Arc::new(ConnectionSession::new(
                    SessionId(index),
                    endpoint,
                    config.session.clone(),
                    Arc::clone(&connector),
                    session_events.clone(),
                ))
            })
            .collect();

        let (events_tx, events_rx) = flume::unbounded();

        Ok(Self {
            sessions,
            active: Mutex::new(None),
            config,
            metrics: Arc::new(PoolMetrics::new()),
            events_tx,
            events_rx,
            monitor: Mutex::new(None),
        })
    }

    /// Start every session in priority order, request a connection on each
    /// and spawn the monitoring loop.
    pub fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return Err(PoolError::AlreadyStarted);
        }

        for session in &self.sessions {
            session.start();
            session.connect();
        }

        *monitor = Some(MonitorHandle::spawn(
            Arc::clone(self),
            self.config.monitoring_period,
        ));

        info!(
            sessions = self.sessions.len(),
            period_ms = self.config.monitoring_period.as_millis() as u64,
            "Connection pool started"
        );
        Ok(())
    }

    /// Stop the monitor, disconnect and join every session.
    pub async fn stop(&self) {
        info!("Stopping connection pool");

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        for session in &self.sessions {
            session.disconnect();
        }
        for session in &self.sessions {
            session.stop().await;
        }

        let previous = self.active.lock().take();
        if let Some(id) = previous {
            let _ = self.events_tx.send(PoolEvent::Deactivated { session: id });
        }

        info!("Connection pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.lock().is_some()
    }

    pub fn sessions(&self) -> &[Arc<ConnectionSession>] {
        &self.sessions
    }

    pub fn session(&self, id: SessionId) -> Option<&Arc<ConnectionSession>> {
        self.sessions.get(id.0)
    }

    /// Receiver of activation changes
    pub fn events(&self) -> Receiver<PoolEvent> {
        self.events_rx.clone()
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        *self.active.lock()
    }

    pub fn active_session(&self) -> Option<Arc<ConnectionSession>> {
        self.active_id()
            .and_then(|id| self.sessions.get(id.0))
            .cloned()
    }

    /// Link of the active session.
    ///
    /// Fails with the retryable [`PoolError::NoActiveConnection`] when no
    /// session is active or the active one lost its link since the last
    /// election.
    pub fn active_connection(&self) -> Result<Arc<dyn IedConnection>, PoolError> {
        self.active_session()
            .and_then(|session| session.connection())
            .ok_or(PoolError::NoActiveConnection)
    }

    /// Apply the election rule and return the active session.
    ///
    /// Keeps the current active session while it is connected, otherwise
    /// picks the highest-priority connected one.
    pub fn elect(&self) -> Option<SessionId> {
        let mut active = self.active.lock();
        let current = *active;

        let next = current
            .filter(|id| self.sessions[id.0].is_connected())
            .or_else(|| {
                self.sessions
                    .iter()
                    .find(|session| session.is_connected())
                    .map(|session| session.id())
            });

        if next == current {
            return next;
        }

        if let Some(old) = current {
            self.sessions[old.0].deactivate();
            warn!(
                session = %old,
                endpoint = %self.sessions[old.0].endpoint(),
                "Active session lost"
            );
            let _ = self.events_tx.send(PoolEvent::Deactivated { session: old });
        }

        if let Some(new) = next {
            self.sessions[new.0].activate();
            self.metrics.record_activation();
            if current.is_some() {
                self.metrics.record_failover();
            }
            info!(
                session = %new,
                endpoint = %self.sessions[new.0].endpoint(),
                "Session activated"
            );
            let _ = self.events_tx.send(PoolEvent::Activated { session: new });
        } else {
            debug!("No connected session to activate");
        }

        *active = next;
        next
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|session| session.snapshot()).collect()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let snapshots = self.snapshots();
        PoolStats {
            total_sessions: snapshots.len(),
            connected_sessions: snapshots.iter().filter(|s| s.state.is_connected()).count(),
            connecting_sessions: snapshots.iter().filter(|s| s.state.is_connecting()).count(),
            fatal_sessions: snapshots.iter().filter(|s| s.state.is_fatal()).count(),
            active: self.active_id(),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("sessions", &self.sessions)
            .field("active", &self.active_id())
            .finish()
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_sessions: usize,
    pub connected_sessions: usize,
    pub connecting_sessions: usize,
    pub fatal_sessions: usize,
    pub active: Option<SessionId>,
}
