//! Connection Session
//!
//! Owns the lifecycle of one endpoint: connect, disconnect and periodic retry.
//! A private tokio task performs every state transition and every call into
//! the protocol engine; owners post requests and read snapshots.
//!
//! ```text
//!   Idle ──connect()──► Connecting ──ok──► Connected
//!    ▲                    │   │               │ I/O failure / peer close
//!    │ disconnect()       │   └─transient──► Closed ◄┘
//!    │                    │                    │
//!    │                permanent           backoff deadline
//!    │                    ▼                    ▼
//!    └──────────────── FatalError     WaitingToReconnect ──deadline──► Connecting
//! ```

use crate::state::{ConnectionState, SessionCounters, SessionSnapshot};
use crate::transport::{IedConnection, IedConnector, SessionConfig, TransportEvent};
use iecgate_core::error::ConnectionError;
use iecgate_core::{CommandFeedback, ConnectionEndpoint, ObjectReference, SessionId, ValueReport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event published by a session to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Value change forwarded from the link
    Value {
        session: SessionId,
        report: ValueReport,
    },
    /// Command confirmation or termination forwarded from the link
    CommandFeedback {
        session: SessionId,
        reference: ObjectReference,
        feedback: CommandFeedback,
    },
    /// The session changed state
    StateChanged {
        session: SessionId,
        state: ConnectionState,
    },
}

impl SessionEvent {
    /// Session that produced the event
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::Value { session, .. }
            | SessionEvent::CommandFeedback { session, .. }
            | SessionEvent::StateChanged { session, .. } => *session,
        }
    }
}

struct SessionInner {
    state: ConnectionState,
    connect_requested: bool,
    disconnect_requested: bool,
    reconnect_deadline: Option<Instant>,
    last_activity: Option<SystemTime>,
    last_error: Option<String>,
    link: Option<Arc<dyn IedConnection>>,
}

struct SessionShared {
    inner: Mutex<SessionInner>,
    active: AtomicBool,
    wake: Notify,
}

/// One logical link to a single IED endpoint
pub struct ConnectionSession {
    id: SessionId,
    endpoint: ConnectionEndpoint,
    config: SessionConfig,
    connector: Arc<dyn IedConnector>,
    events: UnboundedSender<SessionEvent>,
    shared: Arc<SessionShared>,
    counters: SessionCounters,
    shutdown: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Create a session; nothing happens until [`start`](Self::start)
    pub fn new(
        id: SessionId,
        endpoint: ConnectionEndpoint,
        config: SessionConfig,
        connector: Arc<dyn IedConnector>,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            endpoint,
            config,
            connector,
            events,
            shared: Arc::new(SessionShared {
                inner: Mutex::new(SessionInner {
                    state: ConnectionState::Idle,
                    connect_requested: false,
                    disconnect_requested: false,
                    reconnect_deadline: None,
                    last_activity: None,
                    last_error: None,
                    link: None,
                }),
                active: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            counters: SessionCounters::new(),
            shutdown: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Spawn the session task. Calling it on a running session is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        *self.shutdown.lock() = shutdown.clone();

        let worker = SessionWorker {
            id: self.id,
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
            counters: self.counters.clone(),
            shutdown,
            transport_events: None,
        };

        *task = Some(tokio::spawn(worker.run()));
    }

    /// Stop the task, close the link and wait for the task to finish.
    ///
    /// No event is published by this session once `stop` returns.
    pub async fn stop(&self) {
        self.shutdown.lock().cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(session = %self.id, error = %e, "Session task ended abnormally");
            }
        }
        self.deactivate();
    }

    /// True while the session task runs
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Request a connection attempt. Returns immediately.
    pub fn connect(&self) {
        self.shared.inner.lock().connect_requested = true;
        self.shared.wake.notify_one();
    }

    /// Request the link to be closed. Returns immediately.
    pub fn disconnect(&self) {
        self.shared.inner.lock().disconnect_requested = true;
        self.shared.wake.notify_one();
    }

    /// Mark the session as the active one. Returns false if it already was.
    pub fn activate(&self) -> bool {
        !self.shared.active.swap(true, Ordering::AcqRel)
    }

    /// Clear the active mark. Returns false if it was not set.
    pub fn deactivate(&self) -> bool {
        self.shared.active.swap(false, Ordering::AcqRel)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    /// Neither connecting nor connected
    pub fn is_disconnected(&self) -> bool {
        self.state().is_disconnected()
    }

    /// Live connection, only while `Connected`
    pub fn connection(&self) -> Option<Arc<dyn IedConnection>> {
        let inner = self.shared.inner.lock();
        if inner.state.is_connected() {
            inner.link.clone()
        } else {
            None
        }
    }

    /// Consistent view of the session state
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock();
        SessionSnapshot {
            id: self.id,
            endpoint: self.endpoint.socket_address(),
            state: inner.state,
            active: self.is_active(),
            last_activity: inner.last_activity,
            reconnect_deadline: inner.reconnect_deadline,
            last_error: inner.last_error.clone(),
            connect_attempts: self.counters.connect_attempts(),
            connect_failures: self.counters.connect_failures(),
        }
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.socket_address())
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}

enum Step {
    Connect,
    Close,
    Nothing,
}

enum Wake {
    Shutdown,
    Poll,
    Transport(Option<TransportEvent>),
}

/// State owned by the session task
struct SessionWorker {
    id: SessionId,
    endpoint: ConnectionEndpoint,
    config: SessionConfig,
    connector: Arc<dyn IedConnector>,
    events: UnboundedSender<SessionEvent>,
    shared: Arc<SessionShared>,
    counters: SessionCounters,
    shutdown: CancellationToken,
    transport_events: Option<UnboundedReceiver<TransportEvent>>,
}

async fn next_transport_event(
    events: &mut Option<UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionWorker {
    async fn run(mut self) {
        info!(
            session = %self.id,
            endpoint = %self.endpoint,
            "Session task started"
        );

        loop {
            match self.next_step() {
                Step::Connect => self.attempt_connect().await,
                Step::Close => self.close_link("disconnect requested").await,
                Step::Nothing => {}
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            let wake = tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                _ = self.shared.wake.notified() => Wake::Poll,
                _ = tokio::time::sleep(self.config.poll_interval) => Wake::Poll,
                event = next_transport_event(&mut self.transport_events) => Wake::Transport(event),
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Poll => {}
                Wake::Transport(Some(event)) => self.handle_transport_event(event).await,
                Wake::Transport(None) => self.link_lost("event stream ended".to_string()).await,
            }
        }

        self.close_link("session stopped").await;
        info!(session = %self.id, "Session task stopped");
    }

    fn transition(&self, inner: &mut SessionInner, next: ConnectionState) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        inner.state = next;
        debug!(
            session = %self.id,
            from = %previous,
            to = %next,
            "Session state changed"
        );
        let _ = self.events.send(SessionEvent::StateChanged {
            session: self.id,
            state: next,
        });
    }

    /// Evaluate request flags and the reconnect deadline
    fn next_step(&self) -> Step {
        let mut inner = self.shared.inner.lock();

        if inner.disconnect_requested {
            inner.disconnect_requested = false;
            inner.connect_requested = false;
            return match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => Step::Close,
                ConnectionState::Closed | ConnectionState::WaitingToReconnect => {
                    inner.reconnect_deadline = None;
                    self.transition(&mut inner, ConnectionState::Idle);
                    Step::Nothing
                }
                ConnectionState::Idle | ConnectionState::FatalError => Step::Nothing,
            };
        }

        match inner.state {
            ConnectionState::Idle => {
                if std::mem::take(&mut inner.connect_requested) {
                    self.transition(&mut inner, ConnectionState::Connecting);
                    Step::Connect
                } else {
                    Step::Nothing
                }
            }
            ConnectionState::Closed => {
                inner.connect_requested = false;
                inner.reconnect_deadline = Some(Instant::now() + self.config.reconnect_backoff);
                self.transition(&mut inner, ConnectionState::WaitingToReconnect);
                Step::Nothing
            }
            ConnectionState::WaitingToReconnect => {
                inner.connect_requested = false;
                let elapsed = inner
                    .reconnect_deadline
                    .map_or(true, |deadline| Instant::now() >= deadline);
                if elapsed {
                    inner.reconnect_deadline = None;
                    self.transition(&mut inner, ConnectionState::Connecting);
                    Step::Connect
                } else {
                    Step::Nothing
                }
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::FatalError => {
                inner.connect_requested = false;
                Step::Nothing
            }
        }
    }

    async fn attempt_connect(&mut self) {
        self.counters.record_connect_attempt();
        debug!(session = %self.id, endpoint = %self.endpoint, "Connecting");

        let timeout_ms = self.config.connect_timeout.as_millis() as u64;
        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            self.connector.connect(&self.endpoint),
        );

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = attempt => match result {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::ConnectionTimeout { timeout_ms }),
            },
        };

        match result {
            Ok(link) => {
                {
                    let mut inner = self.shared.inner.lock();
                    inner.link = Some(link.connection);
                    inner.last_activity = Some(SystemTime::now());
                    inner.last_error = None;
                    self.transition(&mut inner, ConnectionState::Connected);
                }
                self.transport_events = Some(link.events);
                info!(session = %self.id, endpoint = %self.endpoint, "Connected");
            }
            Err(e) if e.is_permanent() => {
                self.counters.record_connect_failure();
                error!(
                    session = %self.id,
                    endpoint = %self.endpoint,
                    error = %e,
                    "Connection rejected, session will not retry"
                );
                let mut inner = self.shared.inner.lock();
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, ConnectionState::FatalError);
            }
            Err(e) => {
                self.counters.record_connect_failure();
                warn!(
                    session = %self.id,
                    endpoint = %self.endpoint,
                    error = %e,
                    "Connection attempt failed"
                );
                let mut inner = self.shared.inner.lock();
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, ConnectionState::Closed);
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ValueChanged(report) => {
                self.touch();
                let _ = self.events.send(SessionEvent::Value {
                    session: self.id,
                    report,
                });
            }
            TransportEvent::CommandFeedback {
                reference,
                feedback,
            } => {
                self.touch();
                let _ = self.events.send(SessionEvent::CommandFeedback {
                    session: self.id,
                    reference,
                    feedback,
                });
            }
            TransportEvent::Closed { reason } => self.link_lost(reason).await,
        }
    }

    fn touch(&self) {
        self.counters.record_event();
        self.shared.inner.lock().last_activity = Some(SystemTime::now());
    }

    async fn link_lost(&mut self, reason: String) {
        self.transport_events = None;
        self.counters.record_link_lost();

        let link = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_connected() {
                warn!(session = %self.id, reason = %reason, "Link lost");
                inner.last_error = Some(reason);
                self.transition(&mut inner, ConnectionState::Closed);
            }
            inner.link.take()
        };

        // Peer-closed associations are released too
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// Release the link and return to `Idle`; `FatalError` is kept
    async fn close_link(&mut self, reason: &str) {
        self.transport_events = None;

        let link = {
            let mut inner = self.shared.inner.lock();
            inner.reconnect_deadline = None;
            if !inner.state.is_fatal() {
                self.transition(&mut inner, ConnectionState::Idle);
            }
            inner.link.take()
        };

        if let Some(link) = link {
            link.close().await;
            info!(session = %self.id, reason, "Link closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedConnector, SimulatedIed};
    use iecgate_core::RawValue;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(10),
            reconnect_backoff: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
        }
    }

    fn session_with(
        connector: SimulatedConnector,
        endpoint: ConnectionEndpoint,
    ) -> (ConnectionSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(
            SessionId(0),
            endpoint,
            fast_config(),
            Arc::new(connector),
            tx,
        );
        (session, rx)
    }

    async fn wait_for_state(session: &ConnectionSession, state: ConnectionState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.state() != state {
            assert!(
                Instant::now() < deadline,
                "session stuck in {} waiting for {}",
                session.state(),
                state
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_connects_to_reachable_endpoint() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        let (session, mut rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        assert_eq!(session.state(), ConnectionState::Idle);
        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::Connected).await;

        assert!(session.connection().is_some());
        assert_eq!(ied.link_count(), 1);
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::StateChanged {
                session: SessionId(0),
                state: ConnectionState::Connecting
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::StateChanged {
                session: SessionId(0),
                state: ConnectionState::Connected
            })
        );

        session.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_waits_to_reconnect() {
        let endpoint = ConnectionEndpoint::new("10.0.0.9", 102, 0);
        let (session, _rx) = session_with(SimulatedConnector::new(), endpoint);

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::WaitingToReconnect).await;

        let snapshot = session.snapshot();
        assert!(snapshot.reconnect_deadline.is_some());
        assert!(snapshot.last_error.is_some());
        assert!(session.is_disconnected());
        assert!(session.counters().connect_failures() >= 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_retries_after_backoff() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        ied.set_reachable(false);
        let (session, _rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::WaitingToReconnect).await;

        ied.set_reachable(true);
        wait_for_state(&session, ConnectionState::Connected).await;
        assert!(session.counters().connect_attempts() >= 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_association_is_fatal() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        ied.reject_associations(true);
        let (session, _rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::FatalError).await;

        // Neither the backoff nor a new request brings it back
        ied.reject_associations(false);
        session.connect();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(session.state(), ConnectionState::FatalError);
        assert_eq!(session.counters().connect_attempts(), 1);

        session.stop().await;
        assert_eq!(session.state(), ConnectionState::FatalError);
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_close() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        let (session, mut rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::Connected).await;

        ied.drop_links("peer reset");

        let mut seen = Vec::new();
        while seen.last() != Some(&ConnectionState::WaitingToReconnect) {
            if let Some(SessionEvent::StateChanged { state, .. }) = rx.recv().await {
                seen.push(state);
            }
        }
        assert!(seen.contains(&ConnectionState::Closed));
        assert_eq!(ied.closed_links(), 1);

        wait_for_state(&session, ConnectionState::Connected).await;
        assert_eq!(session.counters().links_lost(), 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_forwards_value_changes_with_session_id() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(
            SessionId(3),
            endpoint.clone(),
            fast_config(),
            Arc::new(SimulatedConnector::new().with(&endpoint, Arc::clone(&ied))),
            tx,
        );

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::Connected).await;

        let report = ValueReport::new("LD/GGIO1.AnIn1", RawValue::Float(12.5));
        ied.publish(report.clone());

        loop {
            match rx.recv().await {
                Some(SessionEvent::Value { session: id, report: received }) => {
                    assert_eq!(id, SessionId(3));
                    assert_eq!(received, report);
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert!(session.snapshot().last_activity.is_some());

        session.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_returns_to_idle() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        let (session, _rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        session.start();
        session.connect();
        wait_for_state(&session, ConnectionState::Connected).await;

        session.disconnect();
        wait_for_state(&session, ConnectionState::Idle).await;
        assert_eq!(ied.link_count(), 0);
        assert!(session.connection().is_none());

        // No automatic retry from Idle
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.state(), ConnectionState::Idle);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_joins_task_and_closes_link() {
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let ied = SimulatedIed::new("IED1");
        let (session, mut rx) = session_with(
            SimulatedConnector::new().with(&endpoint, Arc::clone(&ied)),
            endpoint,
        );

        session.start();
        assert!(session.is_running());
        session.connect();
        wait_for_state(&session, ConnectionState::Connected).await;
        session.activate();

        session.stop().await;
        assert!(!session.is_running());
        assert!(!session.is_active());
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(ied.link_count(), 0);

        while rx.try_recv().is_ok() {}
        ied.publish(ValueReport::new("LD/GGIO1.AnIn1", RawValue::Float(1.0)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_activation_flag() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(
            SessionId(0),
            ConnectionEndpoint::new("10.0.0.1", 102, 0),
            SessionConfig::default(),
            Arc::new(SimulatedConnector::new()),
            tx,
        );

        assert!(!session.is_active());
        assert!(session.activate());
        assert!(!session.activate());
        assert!(session.is_active());
        assert!(session.deactivate());
        assert!(!session.deactivate());
    }
}
