//! In-memory IED.
//!
//! Speaks the [`IedConnector`]/[`IedConnection`] boundary without any socket.
//! Used by the test suites and by the `--simulate` mode of the gateway binary.

use crate::transport::{IedConnection, IedConnector, IedLink, TransportEvent};
use async_trait::async_trait;
use iecgate_core::error::ConnectionError;
use iecgate_core::{
    CommandFeedback, CommonDataClass, ConnectionEndpoint, ControlValue, ExchangeDataDescriptor,
    ObjectReference, RawValue, ValueReport,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

/// How the simulated IED answers an operate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMode {
    /// No asynchronous feedback, tests inject it with `send_feedback`
    Manual,
    /// Positive confirmation only
    Confirm,
    /// Positive confirmation followed by a positive termination
    ConfirmAndTerminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlService {
    Select,
    Operate,
}

/// Control request received by the simulated IED
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCall {
    pub service: ControlService,
    pub reference: ObjectReference,
    pub value: Option<ControlValue>,
}

struct IedState {
    reachable: bool,
    reject_associations: bool,
    refuse_controls: bool,
    silent_interrogation: bool,
    feedback: FeedbackMode,
    values: BTreeMap<ObjectReference, ValueReport>,
    links: HashMap<u64, UnboundedSender<TransportEvent>>,
    next_link: u64,
    closed_links: usize,
    calls: Vec<ControlCall>,
}

/// A simulated IED reachable through a [`SimulatedConnector`]
pub struct SimulatedIed {
    name: String,
    state: Mutex<IedState>,
}

impl SimulatedIed {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(IedState {
                reachable: true,
                reject_associations: false,
                refuse_controls: false,
                silent_interrogation: false,
                feedback: FeedbackMode::Manual,
                values: BTreeMap::new(),
                links: HashMap::new(),
                next_link: 0,
                closed_links: 0,
                calls: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unreachable IEDs refuse new links and drop the open ones
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
        if !reachable {
            self.drop_links("host unreachable");
        }
    }

    /// Refuse associations with a permanent error
    pub fn reject_associations(&self, reject: bool) {
        self.state.lock().reject_associations = reject;
    }

    /// Answer select and operate with a service error
    pub fn refuse_controls(&self, refuse: bool) {
        self.state.lock().refuse_controls = refuse;
    }

    /// Leave general interrogations unanswered
    pub fn silence_interrogation(&self, silent: bool) {
        self.state.lock().silent_interrogation = silent;
    }

    pub fn set_feedback_mode(&self, mode: FeedbackMode) {
        self.state.lock().feedback = mode;
    }

    /// Store a value without notifying, returned by general interrogation
    pub fn set_value(&self, report: ValueReport) {
        self.state
            .lock()
            .values
            .insert(report.reference.clone(), report);
    }

    /// Store a value and report it on every open link
    pub fn publish(&self, report: ValueReport) {
        let mut state = self.state.lock();
        state
            .values
            .insert(report.reference.clone(), report.clone());
        for tx in state.links.values() {
            let _ = tx.send(TransportEvent::ValueChanged(report.clone()));
        }
    }

    /// Send command feedback on every open link
    pub fn send_feedback(&self, reference: impl Into<ObjectReference>, feedback: CommandFeedback) {
        let reference = reference.into();
        let state = self.state.lock();
        for tx in state.links.values() {
            let _ = tx.send(TransportEvent::CommandFeedback {
                reference: reference.clone(),
                feedback,
            });
        }
    }

    /// Close every open link from the IED side
    pub fn drop_links(&self, reason: &str) {
        let links: Vec<_> = self.state.lock().links.drain().collect();
        for (_, tx) in links {
            let _ = tx.send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Links released by the client with `close`
    pub fn closed_links(&self) -> usize {
        self.state.lock().closed_links
    }

    /// Control requests received so far, oldest first
    pub fn calls(&self) -> Vec<ControlCall> {
        self.state.lock().calls.clone()
    }

    /// Give every configured object a neutral value for its class
    pub fn seed(&self, descriptors: &[ExchangeDataDescriptor]) {
        for descriptor in descriptors {
            let value = match descriptor.cdc {
                CommonDataClass::SpsTyp | CommonDataClass::SpcTyp => RawValue::Boolean(false),
                CommonDataClass::DpsTyp | CommonDataClass::DpcTyp => {
                    RawValue::BitString { bits: 0b10, len: 2 }
                }
                CommonDataClass::InsTyp
                | CommonDataClass::EnsTyp
                | CommonDataClass::IncTyp
                | CommonDataClass::BscTyp => RawValue::Integer(0),
                CommonDataClass::MvTyp | CommonDataClass::ApcTyp => RawValue::Float(0.0),
            };
            self.set_value(ValueReport::new(descriptor.reference.clone(), value));
        }
    }

    fn open_link(self: &Arc<Self>) -> Result<IedLink, ConnectionError> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(ConnectionError::failed(&self.name, 102, "host unreachable"));
        }
        if state.reject_associations {
            return Err(ConnectionError::AssociationRejected {
                reason: format!("{} refused the association", self.name),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_link;
        state.next_link += 1;
        state.links.insert(id, tx);
        debug!(ied = %self.name, link = id, "Simulated link opened");

        Ok(IedLink {
            connection: Arc::new(SimulatedConnection {
                ied: Arc::clone(self),
                link: id,
            }),
            events: rx,
        })
    }

    fn handle_control(&self, link: u64, call: ControlCall) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        let Some(tx) = state.links.get(&link).cloned() else {
            return Err(ConnectionError::NotConnected);
        };

        let service = call.service;
        let reference = call.reference.clone();
        state.calls.push(call);

        if state.refuse_controls {
            return Err(ConnectionError::service(
                match service {
                    ControlService::Select => "select",
                    ControlService::Operate => "operate",
                },
                "object access denied",
            ));
        }

        if service == ControlService::Operate {
            let mut feedback = Vec::new();
            match state.feedback {
                FeedbackMode::Manual => {}
                FeedbackMode::Confirm => feedback.push(CommandFeedback::confirmation(true)),
                FeedbackMode::ConfirmAndTerminate => {
                    feedback.push(CommandFeedback::confirmation(true));
                    feedback.push(CommandFeedback::termination(true));
                }
            }
            for feedback in feedback {
                let _ = tx.send(TransportEvent::CommandFeedback {
                    reference: reference.clone(),
                    feedback,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedIed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedIed")
            .field("name", &self.name)
            .field("links", &self.link_count())
            .finish()
    }
}

struct SimulatedConnection {
    ied: Arc<SimulatedIed>,
    link: u64,
}

#[async_trait]
impl IedConnection for SimulatedConnection {
    async fn select(
        &self,
        reference: &ObjectReference,
        value: Option<&ControlValue>,
    ) -> Result<(), ConnectionError> {
        self.ied.handle_control(
            self.link,
            ControlCall {
                service: ControlService::Select,
                reference: reference.clone(),
                value: value.cloned(),
            },
        )
    }

    async fn operate(
        &self,
        reference: &ObjectReference,
        value: &ControlValue,
    ) -> Result<(), ConnectionError> {
        self.ied.handle_control(
            self.link,
            ControlCall {
                service: ControlService::Operate,
                reference: reference.clone(),
                value: Some(value.clone()),
            },
        )
    }

    async fn general_interrogation(&self) -> Result<Vec<ValueReport>, ConnectionError> {
        {
            let state = self.ied.state.lock();
            if !state.links.contains_key(&self.link) {
                return Err(ConnectionError::NotConnected);
            }
            if !state.silent_interrogation {
                return Ok(state.values.values().cloned().collect());
            }
        }
        debug!(ied = %self.ied.name, "Interrogation left unanswered");
        std::future::pending().await
    }

    async fn close(&self) {
        let mut state = self.ied.state.lock();
        state.links.remove(&self.link);
        state.closed_links += 1;
    }
}

/// Routes endpoints to simulated IEDs by `address:port`
#[derive(Default)]
pub struct SimulatedConnector {
    ieds: Mutex<HashMap<String, Arc<SimulatedIed>>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, endpoint: &ConnectionEndpoint, ied: Arc<SimulatedIed>) {
        self.ieds.lock().insert(endpoint.socket_address(), ied);
    }

    pub fn with(self, endpoint: &ConnectionEndpoint, ied: Arc<SimulatedIed>) -> Self {
        self.attach(endpoint, ied);
        self
    }

    /// One seeded IED per endpoint, answering commands with confirmation
    /// and termination
    pub fn for_endpoints(
        endpoints: &[ConnectionEndpoint],
        descriptors: &[ExchangeDataDescriptor],
    ) -> (Self, Vec<Arc<SimulatedIed>>) {
        let connector = Self::new();
        let ieds = endpoints
            .iter()
            .map(|endpoint| {
                let ied = SimulatedIed::new(endpoint.to_string());
                ied.seed(descriptors);
                ied.set_feedback_mode(FeedbackMode::ConfirmAndTerminate);
                connector.attach(endpoint, Arc::clone(&ied));
                ied
            })
            .collect();
        (connector, ieds)
    }
}

#[async_trait]
impl IedConnector for SimulatedConnector {
    async fn connect(&self, endpoint: &ConnectionEndpoint) -> Result<IedLink, ConnectionError> {
        let ied = self.ieds.lock().get(&endpoint.socket_address()).cloned();
        match ied {
            Some(ied) => ied.open_link(),
            None => Err(ConnectionError::failed(
                &endpoint.address,
                endpoint.port,
                "no route to host",
            )),
        }
    }
}
