//! Pivot datapoint model.
//!
//! A datapoint serializes as
//! `{"label": .., "PIVOT": {"GTIS" | "GTIM" | "GTIC": {..}}}` where the inner
//! object carries the identifier, the cause of transmission and one node
//! named after the common data class with the value, `q` and `t`.

use crate::quality::Quality;
use crate::timestamp::PivotTimestamp;
use iecgate_core::types::PivotRoot;
use iecgate_core::CommonDataClass;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Origin of every datapoint produced by the gateway
pub const COMING_FROM: &str = "iec61850";

/// Cause of transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Spontaneous,
    ActivationConfirmation,
    ActivationTermination,
    Interrogated,
}

impl Cause {
    pub fn code(&self) -> u8 {
        match self {
            Cause::Spontaneous => 3,
            Cause::ActivationConfirmation => 7,
            Cause::ActivationTermination => 10,
            Cause::Interrogated => 20,
        }
    }
}

impl Serialize for Cause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StVal { value: self.code() }.serialize(serializer)
    }
}

/// `{"stVal": ..}` wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StVal<T> {
    #[serde(rename = "stVal")]
    pub value: T,
}

/// Status value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

/// Analogue value (`mag`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Analogue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i: Option<i64>,
}

/// Step position with transient indication (`valWTr`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPosition {
    pub pos_val: i64,
    pub trans_ind: bool,
}

/// CDC-appropriate value node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PivotValue {
    #[serde(rename = "stVal")]
    Status(StatusValue),
    #[serde(rename = "mag")]
    Analogue(Analogue),
    #[serde(rename = "valWTr")]
    Step(StepPosition),
}

/// Content of the node named after the CDC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdcData {
    #[serde(flatten)]
    pub value: PivotValue,
    pub q: Quality,
    pub t: PivotTimestamp,
}

/// `{"<Cdc>": {..}}`
#[derive(Debug, Clone, PartialEq)]
pub struct CdcNode {
    pub cdc: CommonDataClass,
    pub data: CdcData,
}

impl Serialize for CdcNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.cdc.to_string(), &self.data)?;
        map.end()
    }
}

/// Body under the root node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotObject {
    #[serde(rename = "Identifier")]
    pub identifier: String,
    #[serde(rename = "ComingFrom")]
    pub coming_from: &'static str,
    #[serde(rename = "Cause")]
    pub cause: Cause,
    /// Positive (`true`) or negative command outcome, acknowledgments only
    #[serde(rename = "Confirmation", skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<StVal<bool>>,
    /// `genuine` or `substituted` when the source carried no timestamp
    #[serde(rename = "TmOrg", skip_serializing_if = "Option::is_none")]
    pub tm_org: Option<StVal<&'static str>>,
    #[serde(flatten)]
    pub data: Option<CdcNode>,
}

/// One labelled pivot datapoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotDatapoint {
    pub label: String,
    #[serde(rename = "PIVOT", serialize_with = "serialize_root")]
    pub root: (PivotRoot, PivotObject),
}

fn serialize_root<S: Serializer>(
    root: &(PivotRoot, PivotObject),
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(&root.0, &root.1)?;
    map.end()
}

impl PivotDatapoint {
    /// Monitoring datapoint (GTIS or GTIM depending on the CDC)
    pub fn monitoring(
        label: impl Into<String>,
        pivot_id: impl Into<String>,
        cdc: CommonDataClass,
        cause: Cause,
        data: CdcData,
        timestamp_substituted: bool,
    ) -> Self {
        Self {
            label: label.into(),
            root: (
                cdc.pivot_root(),
                PivotObject {
                    identifier: pivot_id.into(),
                    coming_from: COMING_FROM,
                    cause,
                    confirmation: None,
                    tm_org: Some(StVal {
                        value: if timestamp_substituted {
                            "substituted"
                        } else {
                            "genuine"
                        },
                    }),
                    data: Some(CdcNode { cdc, data }),
                },
            ),
        }
    }

    /// Command acknowledgment (GTIC)
    pub fn command_ack(
        label: impl Into<String>,
        pivot_id: impl Into<String>,
        terminated: bool,
        success: bool,
    ) -> Self {
        Self {
            label: label.into(),
            root: (
                PivotRoot::Gtic,
                PivotObject {
                    identifier: pivot_id.into(),
                    coming_from: COMING_FROM,
                    cause: if terminated {
                        Cause::ActivationTermination
                    } else {
                        Cause::ActivationConfirmation
                    },
                    confirmation: Some(StVal { value: success }),
                    tm_org: None,
                    data: None,
                },
            ),
        }
    }

    pub fn root(&self) -> PivotRoot {
        self.root.0
    }

    pub fn object(&self) -> &PivotObject {
        &self.root.1
    }

    /// Value node, `None` for acknowledgments
    pub fn data(&self) -> Option<&CdcData> {
        self.root.1.data.as_ref().map(|node| &node.data)
    }
}

/// Batch of datapoints for one asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub asset: String,
    pub datapoints: Vec<PivotDatapoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_monitoring_shape() {
        let datapoint = PivotDatapoint::monitoring(
            "TM1",
            "ID-TM1",
            CommonDataClass::MvTyp,
            Cause::Spontaneous,
            CdcData {
                value: PivotValue::Analogue(Analogue {
                    f: Some(12.5),
                    i: None,
                }),
                q: Quality::good(),
                t: PivotTimestamp::from_millis(1_000),
            },
            false,
        );

        let value = serde_json::to_value(&datapoint).unwrap();
        assert_eq!(value["label"], "TM1");
        let gtim = &value["PIVOT"]["GTIM"];
        assert_eq!(gtim["Identifier"], "ID-TM1");
        assert_eq!(gtim["ComingFrom"], "iec61850");
        assert_eq!(gtim["Cause"], json!({ "stVal": 3 }));
        assert_eq!(gtim["TmOrg"], json!({ "stVal": "genuine" }));
        assert_eq!(gtim["MvTyp"]["mag"], json!({ "f": 12.5 }));
        assert_eq!(gtim["MvTyp"]["q"]["Validity"], "good");
        assert_eq!(gtim["MvTyp"]["t"]["SecondSinceEpoch"], 1);
        assert!(gtim.get("Confirmation").is_none());
    }

    #[test]
    fn test_status_shape() {
        let datapoint = PivotDatapoint::monitoring(
            "TS1",
            "TS1",
            CommonDataClass::DpsTyp,
            Cause::Interrogated,
            CdcData {
                value: PivotValue::Status(StatusValue::Text("on")),
                q: Quality::good(),
                t: PivotTimestamp::from_millis(0),
            },
            true,
        );

        let value = serde_json::to_value(&datapoint).unwrap();
        let gtis = &value["PIVOT"]["GTIS"];
        assert_eq!(gtis["Cause"]["stVal"], 20);
        assert_eq!(gtis["TmOrg"]["stVal"], "substituted");
        assert_eq!(gtis["DpsTyp"]["stVal"], "on");
    }

    #[test]
    fn test_command_ack_shape() {
        let ack = PivotDatapoint::command_ack("TC1", "ID-TC1", true, false);
        assert_eq!(ack.root(), PivotRoot::Gtic);
        assert!(ack.data().is_none());

        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(
            value,
            json!({
                "label": "TC1",
                "PIVOT": {
                    "GTIC": {
                        "Identifier": "ID-TC1",
                        "ComingFrom": "iec61850",
                        "Cause": { "stVal": 10 },
                        "Confirmation": { "stVal": false }
                    }
                }
            })
        );
    }
}
