//! Values exchanged with the protocol engine.
//!
//! These are the shapes the engine hands over in its callbacks and accepts in
//! its control primitives. The byte-level MMS encoding stays inside the engine.

use crate::types::ObjectReference;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded value of one data attribute, as produced by the protocol engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    /// Bit string, bit 0 is the first transmitted bit
    BitString { bits: u32, len: u8 },
    VisibleString(String),
}

impl RawValue {
    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Boolean(_) => "boolean",
            RawValue::Integer(_) => "integer",
            RawValue::Unsigned(_) => "unsigned",
            RawValue::Float(_) => "float",
            RawValue::BitString { .. } => "bit-string",
            RawValue::VisibleString(_) => "visible-string",
        }
    }
}

/// One value change notification for a data object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueReport {
    /// Reference of the data object
    pub reference: ObjectReference,
    /// Status or measured value (`stVal`, `mag.f`, `posVal`, ...)
    pub value: RawValue,
    /// Quality bit string in libiec61850 layout
    pub quality: u16,
    /// IEC 61850 UtcTime as transmitted (8 bytes), if the object carries one
    pub timestamp: Option<[u8; 8]>,
}

impl ValueReport {
    /// Creates a report with good quality and no timestamp.
    pub fn new(reference: impl Into<ObjectReference>, value: RawValue) -> Self {
        Self {
            reference: reference.into(),
            value,
            quality: 0,
            timestamp: None,
        }
    }

    pub fn with_quality(mut self, quality: u16) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_timestamp(mut self, timestamp: [u8; 8]) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Value carried by a control command (`ctlVal`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(v) => write!(f, "{}", v),
            ControlValue::Int(v) => write!(f, "{}", v),
            ControlValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Asynchronous feedback for a control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFeedback {
    /// Positive confirmation (or positive termination)
    pub confirmed: bool,
    /// The feedback is a command termination
    pub terminated: bool,
}

impl CommandFeedback {
    pub fn confirmation(confirmed: bool) -> Self {
        Self {
            confirmed,
            terminated: false,
        }
    }

    pub fn termination(confirmed: bool) -> Self {
        Self {
            confirmed,
            terminated: true,
        }
    }
}
