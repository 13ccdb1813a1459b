use iecgate_core::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Connection state of one session to an IED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link and no pending retry
    Idle,
    /// A connection attempt is in progress
    Connecting,
    /// The association is established
    Connected,
    /// The link was lost; a retry will be scheduled
    Closed,
    /// Waiting for the reconnect deadline to elapse
    WaitingToReconnect,
    /// Unrecoverable negotiation failure, no further automatic retry
    FatalError,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::WaitingToReconnect => write!(f, "WaitingToReconnect"),
            ConnectionState::FatalError => write!(f, "FatalError"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    /// Neither connecting nor connected
    pub fn is_disconnected(&self) -> bool {
        !self.is_connected() && !self.is_connecting()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionState::FatalError)
    }
}

/// Counters for one session
#[derive(Debug, Clone, Default)]
pub struct SessionCounters {
    connect_attempts: Arc<AtomicU64>,
    connect_failures: Arc<AtomicU64>,
    links_lost: Arc<AtomicU64>,
    events_received: Arc<AtomicU64>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("session_connect_attempts_total").increment(1);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("session_connect_failures_total").increment(1);
    }

    pub fn record_link_lost(&self) {
        self.links_lost.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("session_links_lost_total").increment(1);
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    pub fn links_lost(&self) -> u64 {
        self.links_lost.load(Ordering::Relaxed)
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }
}

/// Read-only view of a session, taken under the session lock
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub endpoint: String,
    pub state: ConnectionState,
    pub active: bool,
    pub last_activity: Option<SystemTime>,
    pub reconnect_deadline: Option<Instant>,
    pub last_error: Option<String>,
    pub connect_attempts: u64,
    pub connect_failures: u64,
}

impl SessionSnapshot {
    /// Time left before the session retries, zero once the deadline elapsed
    pub fn time_to_reconnect(&self) -> Option<Duration> {
        self.reconnect_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Time since the last traffic on the link
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_activity.and_then(|t| t.elapsed().ok())
    }
}
