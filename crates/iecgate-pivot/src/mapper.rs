//! Data reception and mapping.
//!
//! Turns value reports from the active session into pivot datapoints. A
//! report that does not resolve to a configured object, or whose value does
//! not fit the configured class, is dropped with a warning.

use crate::datapoint::{
    Analogue, CdcData, Cause, PivotDatapoint, PivotValue, Reading, StatusValue, StepPosition,
};
use crate::exchange::ExchangeData;
use crate::quality::Quality;
use crate::timestamp::PivotTimestamp;
use iecgate_core::error::MappingError;
use iecgate_core::{CommonDataClass, RawValue, ValueReport};
use metrics::counter;
use tracing::{debug, warn};

/// Name of a double point position (`Dbpos`)
fn double_point_name(position: i64) -> Option<&'static str> {
    match position {
        0 => Some("intermediate-state"),
        1 => Some("off"),
        2 => Some("on"),
        3 => Some("bad-state"),
        _ => None,
    }
}

/// CDC-appropriate value, `None` when the raw value does not fit the class
pub fn convert_value(cdc: CommonDataClass, raw: &RawValue) -> Option<PivotValue> {
    use CommonDataClass::*;

    match (cdc, raw) {
        (SpsTyp | SpcTyp, RawValue::Boolean(v)) => Some(PivotValue::Status(StatusValue::Bool(*v))),
        (DpsTyp | DpcTyp, RawValue::BitString { bits, len }) if *len >= 2 => {
            // First transmitted bit is the most significant one
            let position = (((bits & 0x1) << 1) | ((bits >> 1) & 0x1)) as i64;
            double_point_name(position).map(|name| PivotValue::Status(StatusValue::Text(name)))
        }
        (DpsTyp | DpcTyp, RawValue::Integer(v)) => {
            double_point_name(*v).map(|name| PivotValue::Status(StatusValue::Text(name)))
        }
        (InsTyp | EnsTyp | IncTyp, RawValue::Integer(v)) => {
            Some(PivotValue::Status(StatusValue::Int(*v)))
        }
        (InsTyp | EnsTyp | IncTyp, RawValue::Unsigned(v)) => i64::try_from(*v)
            .ok()
            .map(|v| PivotValue::Status(StatusValue::Int(v))),
        (MvTyp | ApcTyp, RawValue::Float(v)) => Some(PivotValue::Analogue(Analogue {
            f: Some(*v),
            i: None,
        })),
        (MvTyp | ApcTyp, RawValue::Integer(v)) => Some(PivotValue::Analogue(Analogue {
            f: None,
            i: Some(*v),
        })),
        (BscTyp, RawValue::Integer(v)) => Some(PivotValue::Step(StepPosition {
            pos_val: *v,
            trans_ind: false,
        })),
        _ => None,
    }
}

/// Maps value reports to readings for one asset
#[derive(Debug, Clone)]
pub struct DataMapper {
    asset: String,
    exchange: ExchangeData,
}

impl DataMapper {
    pub fn new(asset: impl Into<String>, exchange: ExchangeData) -> Self {
        Self {
            asset: asset.into(),
            exchange,
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn exchange(&self) -> &ExchangeData {
        &self.exchange
    }

    /// Map one report
    pub fn map(&self, report: &ValueReport, cause: Cause) -> Result<PivotDatapoint, MappingError> {
        let descriptor = self
            .exchange
            .resolve(report.reference.as_str())
            .ok_or_else(|| MappingError::UnknownReference {
                reference: report.reference.to_string(),
            })?;

        let value =
            convert_value(descriptor.cdc, &report.value).ok_or_else(|| MappingError::TypeMismatch {
                reference: report.reference.to_string(),
                cdc: descriptor.cdc.to_string(),
                found: report.value.type_name().to_string(),
            })?;

        let (t, substituted) = match &report.timestamp {
            Some(raw) => (PivotTimestamp::from_utc_time(raw), false),
            None => (PivotTimestamp::now(), true),
        };

        Ok(PivotDatapoint::monitoring(
            descriptor.label.clone(),
            descriptor.pivot_id.clone(),
            descriptor.cdc,
            cause,
            CdcData {
                value,
                q: Quality::from_bits(report.quality),
                t,
            },
            substituted,
        ))
    }

    fn map_or_drop(&self, report: &ValueReport, cause: Cause) -> Option<PivotDatapoint> {
        match self.map(report, cause) {
            Ok(datapoint) => {
                counter!("pivot_datapoints_total").increment(1);
                Some(datapoint)
            }
            Err(e) => {
                counter!("pivot_datapoints_dropped_total").increment(1);
                warn!(reference = %report.reference, error = %e, "Dropping value report");
                None
            }
        }
    }

    /// Spontaneous change of one object
    pub fn on_value_changed(&self, report: &ValueReport) -> Option<Reading> {
        let datapoint = self.map_or_drop(report, Cause::Spontaneous)?;
        Some(Reading {
            asset: self.asset.clone(),
            datapoints: vec![datapoint],
        })
    }

    /// Full snapshot after a general interrogation, one reading for the burst
    pub fn on_all_values_refresh(&self, reports: &[ValueReport]) -> Option<Reading> {
        let datapoints: Vec<_> = reports
            .iter()
            .filter_map(|report| self.map_or_drop(report, Cause::Interrogated))
            .collect();

        debug!(
            received = reports.len(),
            mapped = datapoints.len(),
            "General interrogation mapped"
        );

        if datapoints.is_empty() {
            return None;
        }
        Some(Reading {
            asset: self.asset.clone(),
            datapoints,
        })
    }
}
