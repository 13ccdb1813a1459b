//! Gateway wiring.
//!
//! One router task consumes session events, pool activation changes and
//! command acknowledgments. Only events of the active session reach the
//! mapper and the command tracker. General interrogations run as child tasks
//! of the router so a silent peer never stalls the routing.

use crate::sink::ReadingSink;
use crate::status::ConnectionStatus;
use iecgate_client::{IedConnection, IedConnector, SessionEvent};
use iecgate_control::{ActiveLink, CommandAck, CommandTracker};
use iecgate_core::config::GatewayConfig;
use iecgate_core::error::{ConnectionError, ControlError, GatewayError, PoolError, Result};
use iecgate_core::{SessionId, ValueReport};
use iecgate_pivot::{DataMapper, ExchangeData, PivotCommand};
use iecgate_pool::{ConnectionPool, PoolConfig, PoolEvent, PoolStats};
use metrics::counter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Operation carrying a JSON pivot command as first parameter
pub const OPERATION_PIVOT_COMMAND: &str = "PivotCommand";
/// Operation re-sending the current connection status
pub const OPERATION_CONNECTION_STATUS: &str = "request_connection_status";

struct RouterHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Receivers consumed by the router on start
struct Inbox {
    sessions: UnboundedReceiver<SessionEvent>,
    acks: UnboundedReceiver<CommandAck>,
}

/// Outcome of one general interrogation task
type Interrogation = (SessionId, std::result::Result<Vec<ValueReport>, ConnectionError>);

/// Client side of the gateway towards one IED
pub struct Gateway {
    asset: String,
    pool: Arc<ConnectionPool>,
    mapper: Arc<DataMapper>,
    tracker: Arc<CommandTracker>,
    sink: Arc<dyn ReadingSink>,
    status: Arc<Mutex<ConnectionStatus>>,
    interrogation_timeout: Duration,
    inbox: Mutex<Option<Inbox>>,
    router: Mutex<Option<RouterHandle>>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        connector: Arc<dyn IedConnector>,
        sink: Arc<dyn ReadingSink>,
    ) -> Result<Self> {
        config.validate()?;

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(ConnectionPool::new(
            config.endpoints(),
            PoolConfig::from(&config.tunables),
            connector,
            session_tx,
        )?);

        let exchange = ExchangeData::new(config.descriptors());
        let mapper = Arc::new(DataMapper::new(
            config.gateway.asset_name.clone(),
            exchange.clone(),
        ));

        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(CommandTracker::new(
            Arc::new(exchange),
            Arc::clone(&pool) as Arc<dyn ActiveLink>,
            ack_tx,
            config.tunables.command_timeout(),
        ));

        Ok(Self {
            asset: config.gateway.asset_name.clone(),
            pool,
            mapper,
            tracker,
            sink,
            status: Arc::new(Mutex::new(ConnectionStatus::NotConnected)),
            interrogation_timeout: config.tunables.interrogation_timeout(),
            inbox: Mutex::new(Some(Inbox {
                sessions: session_rx,
                acks: ack_rx,
            })),
            router: Mutex::new(None),
        })
    }

    /// Start the pool and the router task
    pub fn start(&self) -> Result<()> {
        let Some(inbox) = self.inbox.lock().take() else {
            return Err(PoolError::AlreadyStarted.into());
        };

        let router = Router {
            asset: self.asset.clone(),
            pool: Arc::clone(&self.pool),
            mapper: Arc::clone(&self.mapper),
            tracker: Arc::clone(&self.tracker),
            sink: Arc::clone(&self.sink),
            status: Arc::clone(&self.status),
            interrogation_timeout: self.interrogation_timeout,
        };
        let pool_events = self.pool.events();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(router.run(inbox, pool_events, shutdown.clone()));
        *self.router.lock() = Some(RouterHandle { shutdown, task });

        self.pool.start()?;
        info!(asset = %self.asset, "Gateway started");
        Ok(())
    }

    /// Stop the pool and the router, pending commands are dropped
    pub async fn stop(&self) {
        self.pool.stop().await;

        let router = self.router.lock().take();
        if let Some(router) = router {
            router.shutdown.cancel();
            if let Err(e) = router.task.await {
                error!(error = %e, "Router task failed");
            }
        }

        self.tracker.abort_all();
        update_status(
            &self.status,
            self.sink.as_ref(),
            &self.asset,
            ConnectionStatus::NotConnected,
        );
        info!(asset = %self.asset, "Gateway stopped");
    }

    /// Handle an operation request from the pipeline
    pub async fn operation(&self, name: &str, params: &[String]) -> Result<()> {
        match name {
            OPERATION_PIVOT_COMMAND => {
                let json = params.first().ok_or_else(|| {
                    GatewayError::from(ControlError::Malformed {
                        reason: "missing command parameter".to_string(),
                    })
                })?;
                let command = PivotCommand::parse(json)?;
                debug!(identifier = %command.identifier, cdc = %command.cdc, "Pivot command received");
                self.tracker.handle_operation(command.into()).await?;
                Ok(())
            }
            OPERATION_CONNECTION_STATUS => {
                let status = *self.status.lock();
                self.sink.connection_status(&self.asset, status);
                Ok(())
            }
            other => {
                warn!(operation = other, "Unsupported operation");
                Err(GatewayError::UnsupportedOperation(other.to_string()))
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn tracker(&self) -> &Arc<CommandTracker> {
        &self.tracker
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("asset", &self.asset)
            .field("pool", &self.pool)
            .field("status", &self.status())
            .finish()
    }
}

/// Record a status change and report it once
fn update_status(
    status: &Mutex<ConnectionStatus>,
    sink: &dyn ReadingSink,
    asset: &str,
    next: ConnectionStatus,
) {
    {
        let mut current = status.lock();
        if *current == next {
            return;
        }
        *current = next;
    }
    info!(status = %next, "Connection status changed");
    sink.connection_status(asset, next);
}

struct Router {
    asset: String,
    pool: Arc<ConnectionPool>,
    mapper: Arc<DataMapper>,
    tracker: Arc<CommandTracker>,
    sink: Arc<dyn ReadingSink>,
    status: Arc<Mutex<ConnectionStatus>>,
    interrogation_timeout: Duration,
}

impl Router {
    async fn run(
        self,
        mut inbox: Inbox,
        pool_events: flume::Receiver<PoolEvent>,
        shutdown: CancellationToken,
    ) {
        debug!("Router started");
        let mut interrogations: JoinSet<Interrogation> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Ok(event) = pool_events.recv_async() => self.on_pool_event(event, &mut interrogations),
                Some(event) = inbox.sessions.recv() => self.on_session_event(event),
                Some(ack) = inbox.acks.recv() => self.sink.acknowledge(&self.asset, &ack),
                Some(done) = interrogations.join_next(), if !interrogations.is_empty() => match done {
                    Ok((session, result)) => self.on_interrogation(session, result),
                    Err(e) => error!(error = %e, "Interrogation task failed"),
                },
                else => break,
            }
        }
        // Pending interrogations are aborted with the set
        interrogations.shutdown().await;
        debug!("Router stopped");
    }

    fn is_active(&self, session: SessionId) -> bool {
        self.pool.active_id() == Some(session)
    }

    fn on_session_event(&self, event: SessionEvent) {
        if !self.is_active(event.session()) {
            trace!(session = %event.session(), "Ignoring event of standby session");
            counter!("gateway_standby_events_dropped_total").increment(1);
            return;
        }

        match event {
            SessionEvent::Value { report, .. } => {
                if let Some(reading) = self.mapper.on_value_changed(&report) {
                    self.sink.ingest(&reading.asset, reading.datapoints);
                }
            }
            SessionEvent::CommandFeedback {
                reference,
                feedback,
                ..
            } => {
                // The acknowledgment comes back through the tracker channel
                self.tracker.on_command_feedback(&reference, feedback);
            }
            SessionEvent::StateChanged { session, state } => {
                debug!(session = %session, state = ?state, "Active session state changed");
            }
        }
    }

    fn on_pool_event(&self, event: PoolEvent, interrogations: &mut JoinSet<Interrogation>) {
        match event {
            PoolEvent::Activated { session } => {
                self.set_status(ConnectionStatus::Started);
                self.interrogate(session, interrogations);
            }
            PoolEvent::Deactivated { session } => {
                debug!(session = %session, "Session deactivated");
                if self.pool.active_id().is_none() {
                    self.set_status(ConnectionStatus::NotConnected);
                }
            }
        }
    }

    fn set_status(&self, next: ConnectionStatus) {
        update_status(&self.status, self.sink.as_ref(), &self.asset, next);
    }

    /// Start a general interrogation on a newly activated session
    fn interrogate(&self, session: SessionId, interrogations: &mut JoinSet<Interrogation>) {
        let Some(connection) = self
            .pool
            .session(session)
            .and_then(|session| session.connection())
        else {
            debug!(session = %session, "Activated session lost its link before interrogation");
            return;
        };

        let timeout = self.interrogation_timeout;
        interrogations.spawn(async move {
            let result = general_interrogation(connection, timeout).await;
            (session, result)
        });
    }

    fn on_interrogation(
        &self,
        session: SessionId,
        result: std::result::Result<Vec<ValueReport>, ConnectionError>,
    ) {
        match result {
            Ok(reports) => {
                if !self.is_active(session) {
                    debug!(session = %session, "Interrogation result of a replaced session dropped");
                    return;
                }
                info!(session = %session, values = reports.len(), "General interrogation complete");
                if let Some(reading) = self.mapper.on_all_values_refresh(&reports) {
                    self.sink.ingest(&reading.asset, reading.datapoints);
                }
            }
            Err(e) => {
                warn!(session = %session, error = %e, "General interrogation failed");
            }
        }
    }
}

/// Interrogation bounded by `timeout`
async fn general_interrogation(
    connection: Arc<dyn IedConnection>,
    timeout: Duration,
) -> std::result::Result<Vec<ValueReport>, ConnectionError> {
    tokio::time::timeout(timeout, connection.general_interrogation())
        .await
        .unwrap_or(Err(ConnectionError::ConnectionTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }))
}
