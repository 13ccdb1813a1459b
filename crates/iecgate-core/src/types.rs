//! Core types for the iecgate gateway.
//!
//! This module defines the vocabulary shared by the session, pool, mapping and
//! control crates: object references, common data classes, control models,
//! session identifiers and the immutable connection endpoints.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// IEC 61850 object reference, e.g. `simpleIOGenericIO/GGIO1.SPCSO1`.
///
/// Used as the stable key for exchange-data lookups and for outstanding
/// control commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectReference(String);

impl ObjectReference {
    /// Creates a new object reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the logical device part (before the `/`), if any.
    pub fn logical_device(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ld, _)| ld)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectReference {
    fn from(reference: &str) -> Self {
        Self(reference.to_string())
    }
}

impl From<String> for ObjectReference {
    fn from(reference: String) -> Self {
        Self(reference)
    }
}

impl Borrow<str> for ObjectReference {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Position of a session inside its pool.
///
/// The index doubles as the configured priority: index 0 is the preferred
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Semantic type of a monitored or controlled point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommonDataClass {
    /// Single point status
    SpsTyp,
    /// Double point status
    DpsTyp,
    /// Integer status
    InsTyp,
    /// Enumerated status
    EnsTyp,
    /// Measured value
    MvTyp,
    /// Controllable single point
    SpcTyp,
    /// Controllable double point
    DpcTyp,
    /// Controllable integer status
    IncTyp,
    /// Controllable analogue process value
    ApcTyp,
    /// Binary controlled step position
    BscTyp,
}

/// Root node of a pivot datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PivotRoot {
    /// Status information
    Gtis,
    /// Measurement information
    Gtim,
    /// Command information
    Gtic,
}

impl CommonDataClass {
    /// Returns true if the class accepts control commands.
    pub fn is_controllable(&self) -> bool {
        matches!(
            self,
            CommonDataClass::SpcTyp
                | CommonDataClass::DpcTyp
                | CommonDataClass::IncTyp
                | CommonDataClass::ApcTyp
                | CommonDataClass::BscTyp
        )
    }

    /// Returns the pivot root used when reporting values of this class.
    pub fn pivot_root(&self) -> PivotRoot {
        match self {
            CommonDataClass::MvTyp | CommonDataClass::ApcTyp => PivotRoot::Gtim,
            _ => PivotRoot::Gtis,
        }
    }
}

impl fmt::Display for CommonDataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommonDataClass::SpsTyp => "SpsTyp",
            CommonDataClass::DpsTyp => "DpsTyp",
            CommonDataClass::InsTyp => "InsTyp",
            CommonDataClass::EnsTyp => "EnsTyp",
            CommonDataClass::MvTyp => "MvTyp",
            CommonDataClass::SpcTyp => "SpcTyp",
            CommonDataClass::DpcTyp => "DpcTyp",
            CommonDataClass::IncTyp => "IncTyp",
            CommonDataClass::ApcTyp => "ApcTyp",
            CommonDataClass::BscTyp => "BscTyp",
        };
        f.write_str(name)
    }
}

/// IEC 61850 control model (`ctlModel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlModel {
    /// Status only, not controllable
    StatusOnly,
    /// Direct control with normal security
    DirectNormal,
    /// Select before operate with normal security
    SboNormal,
    /// Direct control with enhanced security
    DirectEnhanced,
    /// Select before operate with enhanced security
    SboEnhanced,
}

impl ControlModel {
    /// Maps the numeric `ctlModel` code to a control model.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ControlModel::StatusOnly),
            1 => Some(ControlModel::DirectNormal),
            2 => Some(ControlModel::SboNormal),
            3 => Some(ControlModel::DirectEnhanced),
            4 => Some(ControlModel::SboEnhanced),
            _ => None,
        }
    }

    /// Returns the numeric `ctlModel` code.
    pub fn code(&self) -> u8 {
        match self {
            ControlModel::StatusOnly => 0,
            ControlModel::DirectNormal => 1,
            ControlModel::SboNormal => 2,
            ControlModel::DirectEnhanced => 3,
            ControlModel::SboEnhanced => 4,
        }
    }

    /// Returns true if the model reserves the object before operating.
    pub fn is_select_before_operate(&self) -> bool {
        matches!(self, ControlModel::SboNormal | ControlModel::SboEnhanced)
    }

    /// Returns true if the server sends a command termination.
    pub fn is_enhanced_security(&self) -> bool {
        matches!(self, ControlModel::DirectEnhanced | ControlModel::SboEnhanced)
    }
}

impl Default for ControlModel {
    fn default() -> Self {
        ControlModel::DirectNormal
    }
}

impl fmt::Display for ControlModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlModel::StatusOnly => write!(f, "status-only"),
            ControlModel::DirectNormal => write!(f, "direct-with-normal-security"),
            ControlModel::SboNormal => write!(f, "sbo-with-normal-security"),
            ControlModel::DirectEnhanced => write!(f, "direct-with-enhanced-security"),
            ControlModel::SboEnhanced => write!(f, "sbo-with-enhanced-security"),
        }
    }
}

/// ACSE/presentation/session/transport addressing for one endpoint.
///
/// Carried opaquely to the protocol engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsiParameters {
    pub local_ap_title: Option<String>,
    pub local_ae_qualifier: Option<i32>,
    pub remote_ap_title: Option<String>,
    pub remote_ae_qualifier: Option<i32>,
    #[serde(default)]
    pub local_p_selector: Vec<u8>,
    #[serde(default)]
    pub local_s_selector: Vec<u8>,
    #[serde(default)]
    pub local_t_selector: Vec<u8>,
    #[serde(default)]
    pub remote_p_selector: Vec<u8>,
    #[serde(default)]
    pub remote_s_selector: Vec<u8>,
    #[serde(default)]
    pub remote_t_selector: Vec<u8>,
}

/// Certificate material of a TLS protected association.
///
/// File paths only; loading and the handshake belong to the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsParameters {
    pub private_key: String,
    pub own_cert: String,
    #[serde(default)]
    pub ca_certs: Vec<String>,
    #[serde(default)]
    pub remote_certs: Vec<String>,
}

/// One configured remote device endpoint. Immutable after configuration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    /// IP address or host name of the IED
    pub address: String,
    /// MMS port
    pub port: u16,
    /// Configured order, 0 is the highest priority
    pub priority: usize,
    /// Optional OSI addressing
    pub osi: Option<OsiParameters>,
    /// Optional TLS material
    pub tls: Option<TlsParameters>,
}

impl ConnectionEndpoint {
    /// Creates an endpoint without OSI parameters.
    pub fn new(address: impl Into<String>, port: u16, priority: usize) -> Self {
        Self {
            address: address.into(),
            port,
            priority,
            osi: None,
            tls: None,
        }
    }

    /// Returns `address:port`.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Configured exchange data entry, resolved from an object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDataDescriptor {
    /// Label used towards the pipeline
    pub label: String,
    /// Pivot identifier
    pub pivot_id: String,
    /// Object reference on the IED
    pub reference: ObjectReference,
    /// Common data class
    pub cdc: CommonDataClass,
    /// Control model, meaningful for controllable classes only
    pub control_model: ControlModel,
}

impl ExchangeDataDescriptor {
    /// Returns true if commands may be issued against this entry.
    pub fn is_controllable(&self) -> bool {
        self.cdc.is_controllable() && self.control_model != ControlModel::StatusOnly
    }
}
