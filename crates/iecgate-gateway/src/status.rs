//! Connection status reported to the pipeline.

use serde::Serialize;
use std::fmt;

/// Whether the gateway has an active session towards the IED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Started,
    NotConnected,
}

impl ConnectionStatus {
    pub fn is_started(&self) -> bool {
        matches!(self, ConnectionStatus::Started)
    }

    /// Event sent on status change or on request
    pub fn event(&self, asset: &str) -> StatusEvent {
        StatusEvent {
            asset: asset.to_string(),
            south_event: SouthEvent {
                connx_status: *self,
            },
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Started => write!(f, "started"),
            ConnectionStatus::NotConnected => write!(f, "not_connected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SouthEvent {
    pub connx_status: ConnectionStatus,
}

/// `{"asset": .., "south_event": {"connx_status": ..}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub asset: String,
    pub south_event: SouthEvent,
}
