//! Boundary towards the IEC 61850 protocol engine.
//!
//! The engine performs the MMS encoding, the OSI/TLS negotiation and the
//! report handling. The session manager only sees these traits: a connector
//! that opens links, a connection that offers the control primitives, and an
//! event stream carrying the asynchronous callbacks.

use async_trait::async_trait;
use iecgate_core::error::ConnectionError;
use iecgate_core::{CommandFeedback, ConnectionEndpoint, ControlValue, ObjectReference, ValueReport};
use iecgate_core::config::TunablesConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Asynchronous callback delivered by an established link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A monitored value changed (report or data change)
    ValueChanged(ValueReport),
    /// Confirmation or termination of a control command
    CommandFeedback {
        reference: ObjectReference,
        feedback: CommandFeedback,
    },
    /// The peer closed the association or the socket failed
    Closed { reason: String },
}

/// Control and read services of one established association
#[async_trait]
pub trait IedConnection: Send + Sync {
    /// Reserve a controllable object.
    ///
    /// Enhanced security passes the control value (select-with-value);
    /// normal security passes `None`.
    async fn select(
        &self,
        reference: &ObjectReference,
        value: Option<&ControlValue>,
    ) -> Result<(), ConnectionError>;

    /// Operate a controllable object
    async fn operate(
        &self,
        reference: &ObjectReference,
        value: &ControlValue,
    ) -> Result<(), ConnectionError>;

    /// Read every monitored value (general interrogation)
    async fn general_interrogation(&self) -> Result<Vec<ValueReport>, ConnectionError>;

    /// Release the association
    async fn close(&self);
}

/// An established association plus its callback stream
pub struct IedLink {
    pub connection: Arc<dyn IedConnection>,
    pub events: UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for IedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IedLink").finish_non_exhaustive()
    }
}

/// Opens associations to IEDs
#[async_trait]
pub trait IedConnector: Send + Sync {
    /// Connect and associate with the endpoint.
    ///
    /// Permanent errors (see [`ConnectionError::is_permanent`]) put the
    /// session into `FatalError`; anything else is retried.
    async fn connect(&self, endpoint: &ConnectionEndpoint) -> Result<IedLink, ConnectionError>;
}

/// Timing of one session task
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wake-up period of the session task
    pub poll_interval: Duration,
    /// Delay between a lost link and the next attempt
    pub reconnect_backoff: Duration,
    /// Upper bound of one connection attempt
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            reconnect_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&TunablesConfig> for SessionConfig {
    fn from(tunables: &TunablesConfig) -> Self {
        Self {
            poll_interval: tunables.poll_interval(),
            reconnect_backoff: tunables.reconnect_backoff(),
            connect_timeout: tunables.connect_timeout(),
        }
    }
}
