//! Outstanding command tracking.
//!
//! At most one command per object reference is in flight. Each command is
//! resolved exactly once: by its feedback, by its timeout, or by a rejection
//! while it is issued. Whoever removes the record from the table under the
//! lock emits the acknowledgment.

use crate::model::{CommandPhase, IssueCommand};
use iecgate_client::IedConnection;
use iecgate_core::error::{ControlError, PoolError};
use iecgate_core::{
    CommandFeedback, CommonDataClass, ControlModel, ControlValue, ExchangeDataDescriptor,
    ObjectReference,
};
use iecgate_pivot::{ExchangeData, PivotCommand, PivotDatapoint};
use iecgate_pool::ConnectionPool;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the link commands are issued on
pub trait ActiveLink: Send + Sync {
    fn active_connection(&self) -> Result<Arc<dyn IedConnection>, PoolError>;
}

impl ActiveLink for ConnectionPool {
    fn active_connection(&self) -> Result<Arc<dyn IedConnection>, PoolError> {
        ConnectionPool::active_connection(self)
    }
}

/// Control request addressed by pivot id, label or object reference
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub target: String,
    /// Class named by the requester, checked against the configuration
    pub cdc: Option<CommonDataClass>,
    pub value: ControlValue,
}

impl ControlRequest {
    pub fn new(target: impl Into<String>, value: ControlValue) -> Self {
        Self {
            target: target.into(),
            cdc: None,
            value,
        }
    }
}

impl From<PivotCommand> for ControlRequest {
    fn from(command: PivotCommand) -> Self {
        Self {
            target: command.identifier,
            cdc: Some(command.cdc),
            value: command.value,
        }
    }
}

/// Why a command failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckCause {
    NegativeConfirmation,
    NegativeTermination,
    Timeout,
}

/// Final outcome of one command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAck {
    pub label: String,
    pub pivot_id: String,
    pub reference: ObjectReference,
    pub control_model: ControlModel,
    pub terminated: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<AckCause>,
}

impl CommandAck {
    fn new(command: &OutstandingCommand, terminated: bool, success: bool) -> Self {
        Self {
            label: command.label.clone(),
            pivot_id: command.pivot_id.clone(),
            reference: command.reference.clone(),
            control_model: command.control_model,
            terminated,
            success,
            cause: None,
        }
    }

    fn with_cause(mut self, cause: AckCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// `GTIC` acknowledgment datapoint
    pub fn to_pivot(&self) -> PivotDatapoint {
        PivotDatapoint::command_ack(
            self.label.clone(),
            self.pivot_id.clone(),
            self.terminated,
            self.success,
        )
    }
}

#[derive(Debug, Clone)]
struct OutstandingCommand {
    label: String,
    pivot_id: String,
    reference: ObjectReference,
    value: ControlValue,
    control_model: ControlModel,
    issued_at: Instant,
    phase: CommandPhase,
    generation: u64,
}

#[derive(Default)]
struct CommandTable {
    outstanding: HashMap<ObjectReference, OutstandingCommand>,
    next_generation: u64,
}

impl CommandTable {
    /// Remove the record only if it still belongs to `generation`
    fn take(&mut self, reference: &ObjectReference, generation: u64) -> Option<OutstandingCommand> {
        match self.outstanding.get(reference) {
            Some(command) if command.generation == generation => self.outstanding.remove(reference),
            _ => None,
        }
    }
}

/// Type check of a `ctlVal` against the class of its target
fn check_value(cdc: CommonDataClass, value: &ControlValue) -> Result<(), String> {
    use CommonDataClass::*;

    let accepted = match (cdc, value) {
        (SpcTyp | DpcTyp, ControlValue::Bool(_)) => true,
        (IncTyp, ControlValue::Int(_)) => true,
        (ApcTyp, ControlValue::Float(_) | ControlValue::Int(_)) => true,
        (BscTyp, ControlValue::Int(v)) => (-1..=1).contains(v),
        _ => false,
    };

    if accepted {
        Ok(())
    } else {
        Err(format!("{} is not a valid ctlVal for {}", value, cdc))
    }
}

/// Validates, issues and tracks control commands
pub struct CommandTracker {
    exchange: Arc<ExchangeData>,
    links: Arc<dyn ActiveLink>,
    acks: UnboundedSender<CommandAck>,
    timeout: Duration,
    table: Arc<Mutex<CommandTable>>,
    shutdown: Mutex<CancellationToken>,
}

impl CommandTracker {
    pub fn new(
        exchange: Arc<ExchangeData>,
        links: Arc<dyn ActiveLink>,
        acks: UnboundedSender<CommandAck>,
        timeout: Duration,
    ) -> Self {
        Self {
            exchange,
            links,
            acks,
            timeout,
            table: Arc::new(Mutex::new(CommandTable::default())),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    fn lookup(&self, target: &str) -> Option<&ExchangeDataDescriptor> {
        self.exchange
            .by_pivot_id(target)
            .or_else(|| self.exchange.by_label(target))
            .or_else(|| self.exchange.resolve(target))
    }

    /// Issue a control command on the active session.
    ///
    /// On success the command stays outstanding until its feedback or its
    /// timeout produces a [`CommandAck`]. A rejected command leaves no record
    /// behind and produces no acknowledgment. A refusal that comes back after
    /// the timeout already acknowledged the command is not reported again.
    pub async fn handle_operation(&self, request: ControlRequest) -> Result<(), ControlError> {
        let descriptor = self
            .lookup(&request.target)
            .ok_or_else(|| ControlError::UnknownReference {
                reference: request.target.clone(),
            })?;

        if !descriptor.is_controllable() {
            return Err(ControlError::NotControllable {
                reference: descriptor.reference.to_string(),
            });
        }

        if let Some(cdc) = request.cdc {
            if cdc != descriptor.cdc {
                return Err(ControlError::InvalidValue {
                    reference: descriptor.reference.to_string(),
                    reason: format!("command class {} does not match {}", cdc, descriptor.cdc),
                });
            }
        }

        check_value(descriptor.cdc, &request.value).map_err(|reason| {
            ControlError::InvalidValue {
                reference: descriptor.reference.to_string(),
                reason,
            }
        })?;

        let link = self
            .links
            .active_connection()
            .map_err(|_| ControlError::NoActiveConnection)?;

        let reference = descriptor.reference.clone();
        let model = descriptor.control_model;
        let generation = {
            let mut table = self.table.lock();
            if table.outstanding.contains_key(&reference) {
                return Err(ControlError::DuplicateCommand {
                    reference: reference.to_string(),
                });
            }
            table.next_generation += 1;
            let generation = table.next_generation;
            table.outstanding.insert(
                reference.clone(),
                OutstandingCommand {
                    label: descriptor.label.clone(),
                    pivot_id: descriptor.pivot_id.clone(),
                    reference: reference.clone(),
                    value: request.value.clone(),
                    control_model: model,
                    issued_at: Instant::now(),
                    phase: model.initial_phase(),
                    generation,
                },
            );
            generation
        };

        self.spawn_timeout(reference.clone(), generation);

        match model.issue(link.as_ref(), &reference, &request.value).await {
            Ok(phase) => {
                let mut table = self.table.lock();
                if let Some(command) = table.outstanding.get_mut(&reference) {
                    // Feedback may already have moved the command further
                    if command.generation == generation && command.phase == CommandPhase::Selected {
                        command.phase = phase;
                    }
                }
                drop(table);

                counter!("control_commands_total", "outcome" => "issued").increment(1);
                info!(
                    reference = %reference,
                    model = %model,
                    value = %request.value,
                    "Control command issued"
                );
                Ok(())
            }
            Err(e) => {
                if self.table.lock().take(&reference, generation).is_none() {
                    // The timer resolved the command while it was being issued
                    warn!(reference = %reference, error = %e, "Control command failed after its timeout");
                    return Ok(());
                }
                counter!("control_commands_total", "outcome" => "rejected").increment(1);
                warn!(reference = %reference, error = %e, "Control command rejected");
                Err(e)
            }
        }
    }

    fn spawn_timeout(&self, reference: ObjectReference, generation: u64) {
        let table = Arc::clone(&self.table);
        let acks = self.acks.clone();
        let timeout = self.timeout;
        let shutdown = self.shutdown.lock().clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }

            let Some(command) = table.lock().take(&reference, generation) else {
                return;
            };

            counter!("control_commands_total", "outcome" => "timeout").increment(1);
            warn!(
                reference = %reference,
                phase = ?command.phase,
                elapsed_ms = command.issued_at.elapsed().as_millis() as u64,
                "Control command timed out"
            );
            let _ = acks.send(CommandAck::new(&command, false, false).with_cause(AckCause::Timeout));
        });
    }

    /// Apply confirmation or termination feedback from the active session.
    ///
    /// Returns the acknowledgment when the feedback resolves the command.
    pub fn on_command_feedback(
        &self,
        reference: &ObjectReference,
        feedback: CommandFeedback,
    ) -> Option<CommandAck> {
        let Some(key) = self
            .exchange
            .resolve(reference.as_str())
            .map(|descriptor| descriptor.reference.clone())
        else {
            debug!(reference = %reference, "Feedback for unconfigured object");
            return None;
        };

        let ack = {
            let mut table = self.table.lock();
            let Some(command) = table.outstanding.get_mut(&key) else {
                debug!(reference = %key, ?feedback, "Feedback without outstanding command");
                return None;
            };

            if feedback.terminated {
                let command = table.outstanding.remove(&key)?;
                let ack = CommandAck::new(&command, true, feedback.confirmed);
                if feedback.confirmed {
                    ack
                } else {
                    ack.with_cause(AckCause::NegativeTermination)
                }
            } else if !feedback.confirmed {
                let command = table.outstanding.remove(&key)?;
                CommandAck::new(&command, false, false).with_cause(AckCause::NegativeConfirmation)
            } else if command.control_model.is_enhanced_security() {
                command.phase = CommandPhase::AwaitingTermination;
                debug!(reference = %key, value = %command.value, "Confirmed, awaiting termination");
                return None;
            } else {
                let command = table.outstanding.remove(&key)?;
                CommandAck::new(&command, false, true)
            }
        };

        let outcome = if ack.success { "success" } else { "failure" };
        counter!("control_commands_total", "outcome" => outcome).increment(1);
        info!(
            reference = %ack.reference,
            terminated = ack.terminated,
            success = ack.success,
            "Control command completed"
        );

        let _ = self.acks.send(ack.clone());
        Some(ack)
    }

    /// Drop every outstanding command without acknowledging it
    pub fn abort_all(&self) -> usize {
        let previous = std::mem::replace(&mut *self.shutdown.lock(), CancellationToken::new());
        previous.cancel();

        let aborted = {
            let mut table = self.table.lock();
            let count = table.outstanding.len();
            table.outstanding.clear();
            count
        };
        if aborted > 0 {
            warn!(aborted, "Aborted outstanding control commands");
        }
        aborted
    }

    pub fn outstanding(&self) -> usize {
        self.table.lock().outstanding.len()
    }

    pub fn is_outstanding(&self, reference: &ObjectReference) -> bool {
        self.table.lock().outstanding.contains_key(reference)
    }

    /// Phase of the outstanding command for `reference`
    pub fn phase(&self, reference: &ObjectReference) -> Option<CommandPhase> {
        self.table
            .lock()
            .outstanding
            .get(reference)
            .map(|command| command.phase)
    }
}

impl std::fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTracker")
            .field("timeout", &self.timeout)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iecgate_client::sim::{ControlService, SimulatedConnector, SimulatedIed};
    use iecgate_client::{IedConnector, IedLink};
    use iecgate_core::error::ConnectionError;
    use iecgate_core::{ConnectionEndpoint, ValueReport};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct StubLink {
        link: Mutex<Option<IedLink>>,
    }

    impl ActiveLink for StubLink {
        fn active_connection(&self) -> Result<Arc<dyn IedConnection>, PoolError> {
            self.link
                .lock()
                .as_ref()
                .map(|link| Arc::clone(&link.connection))
                .ok_or(PoolError::NoActiveConnection)
        }
    }

    fn descriptor(
        label: &str,
        reference: &str,
        cdc: CommonDataClass,
        control_model: ControlModel,
    ) -> ExchangeDataDescriptor {
        ExchangeDataDescriptor {
            label: label.to_string(),
            pivot_id: format!("ID-{}", label),
            reference: reference.into(),
            cdc,
            control_model,
        }
    }

    struct Bench {
        ied: Arc<SimulatedIed>,
        links: Arc<StubLink>,
        tracker: CommandTracker,
        acks: UnboundedReceiver<CommandAck>,
    }

    async fn bench(timeout: Duration) -> Bench {
        let ied = SimulatedIed::new("IED1");
        let endpoint = ConnectionEndpoint::new("10.0.0.1", 102, 0);
        let link = SimulatedConnector::new()
            .with(&endpoint, Arc::clone(&ied))
            .connect(&endpoint)
            .await
            .unwrap();
        let links = Arc::new(StubLink {
            link: Mutex::new(Some(link)),
        });

        let exchange = ExchangeData::new(vec![
            descriptor("TC1", "LD/GGIO1.SPCSO1", CommonDataClass::SpcTyp, ControlModel::DirectNormal),
            descriptor("TC2", "LD/GGIO1.SPCSO2", CommonDataClass::SpcTyp, ControlModel::SboEnhanced),
            descriptor("TC3", "LD/YLTC1.TapChg", CommonDataClass::BscTyp, ControlModel::SboNormal),
            descriptor("TS1", "LD/GGIO1.Ind1", CommonDataClass::SpsTyp, ControlModel::StatusOnly),
        ]);

        let (tx, acks) = mpsc::unbounded_channel();
        let tracker = CommandTracker::new(
            Arc::new(exchange),
            Arc::clone(&links) as Arc<dyn ActiveLink>,
            tx,
            timeout,
        );
        Bench {
            ied,
            links,
            tracker,
            acks,
        }
    }

    fn operates(ied: &SimulatedIed) -> usize {
        ied.calls()
            .iter()
            .filter(|call| call.service == ControlService::Operate)
            .count()
    }

    #[tokio::test]
    async fn test_normal_security_confirmation_completes() {
        let mut bench = bench(Duration::from_secs(5)).await;
        let reference = ObjectReference::from("LD/GGIO1.SPCSO1");

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();
        assert_eq!(bench.tracker.phase(&reference), Some(CommandPhase::Operated));

        let ack = bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::confirmation(true))
            .unwrap();
        assert!(ack.success);
        assert!(!ack.terminated);
        assert_eq!(ack.label, "TC1");
        assert_eq!(bench.acks.recv().await.unwrap(), ack);
        assert_eq!(bench.tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_enhanced_security_waits_for_termination() {
        let mut bench = bench(Duration::from_secs(5)).await;
        let reference = ObjectReference::from("LD/GGIO1.SPCSO2");

        bench
            .tracker
            .handle_operation(ControlRequest::new("ID-TC2", ControlValue::Bool(true)))
            .await
            .unwrap();
        assert_eq!(bench.ied.calls().len(), 2);

        // Feedback arrives with the attribute path of Oper
        let oper = ObjectReference::from("LD/GGIO1.SPCSO2.Oper");
        assert!(bench
            .tracker
            .on_command_feedback(&oper, CommandFeedback::confirmation(true))
            .is_none());
        assert_eq!(
            bench.tracker.phase(&reference),
            Some(CommandPhase::AwaitingTermination)
        );
        assert!(bench.acks.try_recv().is_err());

        let ack = bench
            .tracker
            .on_command_feedback(&oper, CommandFeedback::termination(true))
            .unwrap();
        assert!(ack.terminated);
        assert!(ack.success);
        assert_eq!(ack.cause, None);
        assert!(!bench.tracker.is_outstanding(&reference));

        let datapoint = ack.to_pivot();
        assert_eq!(datapoint.object().identifier, "ID-TC2");
        assert_eq!(datapoint.object().cause.code(), 10);
    }

    #[tokio::test]
    async fn test_negative_feedback_fails_command() {
        let bench = bench(Duration::from_secs(5)).await;
        let reference = ObjectReference::from("LD/GGIO1.SPCSO2");

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC2", ControlValue::Bool(false)))
            .await
            .unwrap();
        let ack = bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::confirmation(false))
            .unwrap();
        assert!(!ack.success);
        assert!(!ack.terminated);
        assert_eq!(ack.cause, Some(AckCause::NegativeConfirmation));

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC2", ControlValue::Bool(true)))
            .await
            .unwrap();
        bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::confirmation(true));
        let ack = bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::termination(false))
            .unwrap();
        assert!(ack.terminated);
        assert!(!ack.success);
        assert_eq!(ack.cause, Some(AckCause::NegativeTermination));
    }

    #[tokio::test]
    async fn test_duplicate_command_is_rejected() {
        let bench = bench(Duration::from_secs(5)).await;

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();
        let second = bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(false)))
            .await;
        assert!(matches!(second, Err(ControlError::DuplicateCommand { .. })));
        assert_eq!(operates(&bench.ied), 1);
        assert_eq!(bench.tracker.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_timeout_acknowledges_once() {
        let mut bench = bench(Duration::from_millis(50)).await;
        let reference = ObjectReference::from("LD/GGIO1.SPCSO2");

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC2", ControlValue::Bool(true)))
            .await
            .unwrap();

        let ack = tokio::time::timeout(Duration::from_secs(2), bench.acks.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.cause, Some(AckCause::Timeout));
        assert!(!ack.success);
        assert!(!bench.tracker.is_outstanding(&reference));

        // Late feedback does not produce a second outcome
        assert!(bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::termination(true))
            .is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bench.acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_timer_ignores_newer_command() {
        let mut bench = bench(Duration::from_millis(200)).await;
        let reference = ObjectReference::from("LD/GGIO1.SPCSO1");

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();
        bench
            .tracker
            .on_command_feedback(&reference, CommandFeedback::confirmation(true))
            .unwrap();
        assert!(bench.acks.recv().await.unwrap().success);

        tokio::time::sleep(Duration::from_millis(120)).await;
        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(false)))
            .await
            .unwrap();

        // First timer has fired by now
        tokio::time::sleep(Duration::from_millis(140)).await;
        assert!(bench.tracker.is_outstanding(&reference));
        assert!(bench.acks.try_recv().is_err());

        let ack = tokio::time::timeout(Duration::from_secs(2), bench.acks.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.cause, Some(AckCause::Timeout));
    }

    #[tokio::test]
    async fn test_validation_rejections() {
        let bench = bench(Duration::from_secs(5)).await;

        let unknown = bench
            .tracker
            .handle_operation(ControlRequest::new("TC9", ControlValue::Bool(true)))
            .await;
        assert!(matches!(unknown, Err(ControlError::UnknownReference { .. })));

        let status = bench
            .tracker
            .handle_operation(ControlRequest::new("TS1", ControlValue::Bool(true)))
            .await;
        assert!(matches!(status, Err(ControlError::NotControllable { .. })));

        let wrong_type = bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Int(1)))
            .await;
        assert!(matches!(wrong_type, Err(ControlError::InvalidValue { .. })));

        let out_of_range = bench
            .tracker
            .handle_operation(ControlRequest::new("TC3", ControlValue::Int(2)))
            .await;
        assert!(matches!(out_of_range, Err(ControlError::InvalidValue { .. })));

        let wrong_class = bench
            .tracker
            .handle_operation(ControlRequest {
                target: "TC1".to_string(),
                cdc: Some(CommonDataClass::DpcTyp),
                value: ControlValue::Bool(true),
            })
            .await;
        assert!(matches!(wrong_class, Err(ControlError::InvalidValue { .. })));

        assert!(bench.ied.calls().is_empty());
        assert_eq!(bench.tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_rejections_release_the_reference() {
        let bench = bench(Duration::from_secs(5)).await;

        bench.ied.refuse_controls(true);
        let refused = bench
            .tracker
            .handle_operation(ControlRequest::new("TC3", ControlValue::Int(1)))
            .await;
        assert!(matches!(refused, Err(ControlError::Refused { .. })));
        assert_eq!(bench.tracker.outstanding(), 0);

        bench.ied.refuse_controls(false);
        let inactive = bench.links.link.lock().take();
        let no_link = bench
            .tracker
            .handle_operation(ControlRequest::new("TC3", ControlValue::Int(1)))
            .await;
        assert!(matches!(no_link, Err(ControlError::NoActiveConnection)));

        *bench.links.link.lock() = inactive;
        bench
            .tracker
            .handle_operation(ControlRequest::new("TC3", ControlValue::Int(1)))
            .await
            .unwrap();
        assert_eq!(bench.tracker.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_closed_link_maps_to_no_active_connection() {
        let bench = bench(Duration::from_secs(5)).await;
        bench.ied.drop_links("peer reset");

        let result = bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await;
        assert!(matches!(result, Err(ControlError::NoActiveConnection)));
        assert_eq!(bench.tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_silences_timers() {
        let mut bench = bench(Duration::from_millis(50)).await;

        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();
        assert_eq!(bench.tracker.abort_all(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bench.acks.try_recv().is_err());

        // Tracker accepts new commands afterwards
        bench
            .tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();
        assert_eq!(bench.tracker.outstanding(), 1);
    }

    /// Operates slowly, then refuses
    struct SlowRefusal {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl IedConnection for SlowRefusal {
        async fn select(
            &self,
            _reference: &ObjectReference,
            _value: Option<&ControlValue>,
        ) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn operate(
            &self,
            _reference: &ObjectReference,
            _value: &ControlValue,
        ) -> Result<(), ConnectionError> {
            tokio::time::sleep(self.delay).await;
            Err(ConnectionError::ServiceFailed {
                service: "operate".to_string(),
                reason: "object access denied".to_string(),
            })
        }

        async fn general_interrogation(&self) -> Result<Vec<ValueReport>, ConnectionError> {
            Ok(Vec::new())
        }

        async fn close(&self) {}
    }

    struct FixedLink(Arc<dyn IedConnection>);

    impl ActiveLink for FixedLink {
        fn active_connection(&self) -> Result<Arc<dyn IedConnection>, PoolError> {
            Ok(Arc::clone(&self.0))
        }
    }

    fn slow_tracker(
        delay: Duration,
        timeout: Duration,
    ) -> (CommandTracker, UnboundedReceiver<CommandAck>) {
        let exchange = ExchangeData::new(vec![descriptor(
            "TC1",
            "LD/GGIO1.SPCSO1",
            CommonDataClass::SpcTyp,
            ControlModel::DirectNormal,
        )]);
        let (tx, acks) = mpsc::unbounded_channel();
        let tracker = CommandTracker::new(
            Arc::new(exchange),
            Arc::new(FixedLink(Arc::new(SlowRefusal { delay }))),
            tx,
            timeout,
        );
        (tracker, acks)
    }

    #[tokio::test]
    async fn test_refusal_after_timeout_is_reported_once() {
        let (tracker, mut acks) =
            slow_tracker(Duration::from_millis(100), Duration::from_millis(20));

        // The timeout resolved the command before the refusal came back
        tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await
            .unwrap();

        let ack = acks.try_recv().unwrap();
        assert_eq!(ack.cause, Some(AckCause::Timeout));
        assert!(!ack.success);
        assert_eq!(tracker.outstanding(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refusal_within_timeout_is_not_acknowledged() {
        let (tracker, mut acks) =
            slow_tracker(Duration::from_millis(20), Duration::from_millis(200));

        let refused = tracker
            .handle_operation(ControlRequest::new("TC1", ControlValue::Bool(true)))
            .await;
        assert!(matches!(refused, Err(ControlError::Refused { .. })));
        assert_eq!(tracker.outstanding(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(acks.try_recv().is_err());
    }

    #[test]
    fn test_ack_serialization() {
        let ack = CommandAck {
            label: "TC1".to_string(),
            pivot_id: "ID-TC1".to_string(),
            reference: "LD/GGIO1.SPCSO1".into(),
            control_model: ControlModel::DirectNormal,
            terminated: false,
            success: false,
            cause: Some(AckCause::Timeout),
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["cause"], "timeout");
        assert_eq!(json["control_model"], "direct_normal");
        assert_eq!(json["reference"], "LD/GGIO1.SPCSO1");
    }
}
