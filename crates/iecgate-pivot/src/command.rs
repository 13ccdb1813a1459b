//! Incoming pivot control commands.

use iecgate_core::error::ControlError;
use iecgate_core::{CommonDataClass, ControlValue};
use serde::Deserialize;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "PIVOT")]
    pivot: Root,
}

#[derive(Deserialize)]
struct Root {
    #[serde(rename = "GTIC")]
    gtic: Gtic,
}

#[derive(Deserialize)]
struct Gtic {
    #[serde(rename = "Identifier")]
    identifier: String,
    #[serde(rename = "SpcTyp")]
    spc: Option<CtlNode>,
    #[serde(rename = "DpcTyp")]
    dpc: Option<CtlNode>,
    #[serde(rename = "IncTyp")]
    inc: Option<CtlNode>,
    #[serde(rename = "ApcTyp")]
    apc: Option<CtlNode>,
    #[serde(rename = "BscTyp")]
    bsc: Option<CtlNode>,
}

#[derive(Deserialize)]
struct CtlNode {
    #[serde(rename = "ctlVal")]
    ctl_val: ControlValue,
}

/// Control request decoded from a `PIVOT.GTIC` object
#[derive(Debug, Clone, PartialEq)]
pub struct PivotCommand {
    /// Pivot identifier of the target
    pub identifier: String,
    /// Class named in the command
    pub cdc: CommonDataClass,
    /// Requested `ctlVal`
    pub value: ControlValue,
}

impl PivotCommand {
    pub fn parse(json: &str) -> Result<Self, ControlError> {
        let envelope: Envelope = serde_json::from_str(json).map_err(|e| ControlError::Malformed {
            reason: e.to_string(),
        })?;
        let gtic = envelope.pivot.gtic;

        let nodes = [
            (CommonDataClass::SpcTyp, gtic.spc),
            (CommonDataClass::DpcTyp, gtic.dpc),
            (CommonDataClass::IncTyp, gtic.inc),
            (CommonDataClass::ApcTyp, gtic.apc),
            (CommonDataClass::BscTyp, gtic.bsc),
        ];

        let (cdc, node) = nodes
            .into_iter()
            .find_map(|(cdc, node)| node.map(|node| (cdc, node)))
            .ok_or_else(|| ControlError::Malformed {
                reason: format!("no controllable CDC in command for {}", gtic.identifier),
            })?;

        Ok(Self {
            identifier: gtic.identifier,
            cdc,
            value: node.ctl_val,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_point_command() {
        let json = r#"{
            "PIVOT": {
                "GTIC": {
                    "ComingFrom": "iec61850",
                    "Identifier": "TS1",
                    "SpcTyp": { "ctlVal": true, "q": { "Validity": "good" } },
                    "Select": { "stVal": false }
                }
            }
        }"#;

        let command = PivotCommand::parse(json).unwrap();
        assert_eq!(command.identifier, "TS1");
        assert_eq!(command.cdc, CommonDataClass::SpcTyp);
        assert_eq!(command.value, ControlValue::Bool(true));
    }

    #[test]
    fn test_parse_numeric_values() {
        let inc = r#"{"PIVOT":{"GTIC":{"Identifier":"TC2","IncTyp":{"ctlVal":7}}}}"#;
        assert_eq!(PivotCommand::parse(inc).unwrap().value, ControlValue::Int(7));

        let apc = r#"{"PIVOT":{"GTIC":{"Identifier":"TC3","ApcTyp":{"ctlVal":1.5}}}}"#;
        let command = PivotCommand::parse(apc).unwrap();
        assert_eq!(command.cdc, CommonDataClass::ApcTyp);
        assert_eq!(command.value, ControlValue::Float(1.5));
    }

    #[test]
    fn test_malformed_commands() {
        for json in [
            "not json",
            r#"{"PIVOT":{"GTIS":{"Identifier":"TS1"}}}"#,
            r#"{"PIVOT":{"GTIC":{"Identifier":"TS1"}}}"#,
            r#"{"PIVOT":{"GTIC":{"Identifier":"TS1","SpcTyp":{}}}}"#,
        ] {
            assert!(matches!(
                PivotCommand::parse(json),
                Err(ControlError::Malformed { .. })
            ));
        }
    }
}
