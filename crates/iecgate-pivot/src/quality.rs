//! IEC 61850 quality decoding.
//!
//! The quality bit string arrives in the libiec61850 layout: validity in the
//! two low bits, then one bit per detail flag. Every flag decodes
//! independently of the others.

use serde::Serialize;

const VALIDITY_MASK: u16 = 0x0003;
const OVERFLOW: u16 = 0x0004;
const OUT_OF_RANGE: u16 = 0x0008;
const BAD_REFERENCE: u16 = 0x0010;
const OSCILLATORY: u16 = 0x0020;
const FAILURE: u16 = 0x0040;
const OLD_DATA: u16 = 0x0080;
const INCONSISTENT: u16 = 0x0100;
const INACCURATE: u16 = 0x0200;
const SUBSTITUTED: u16 = 0x0400;
const TEST: u16 = 0x0800;
const OPERATOR_BLOCKED: u16 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Good,
    Reserved,
    Invalid,
    Questionable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Process,
    Substituted,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Detail quality flags, only the raised ones are serialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailQuality {
    #[serde(skip_serializing_if = "is_false")]
    pub overflow: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub out_of_range: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub bad_reference: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub oscillatory: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub failure: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub old_data: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub inconsistent: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub inaccurate: bool,
}

/// Decoded quality record (`q`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quality {
    #[serde(rename = "Validity")]
    pub validity: Validity,
    #[serde(rename = "DetailQuality")]
    pub detail: DetailQuality,
    #[serde(rename = "Source")]
    pub source: Source,
    pub test: bool,
    #[serde(rename = "operatorBlocked")]
    pub operator_blocked: bool,
}

impl Quality {
    pub fn good() -> Self {
        Self::from_bits(0)
    }

    pub fn from_bits(bits: u16) -> Self {
        let validity = match bits & VALIDITY_MASK {
            0 => Validity::Good,
            1 => Validity::Reserved,
            2 => Validity::Invalid,
            _ => Validity::Questionable,
        };
        let set = |mask: u16| bits & mask != 0;

        Self {
            validity,
            detail: DetailQuality {
                overflow: set(OVERFLOW),
                out_of_range: set(OUT_OF_RANGE),
                bad_reference: set(BAD_REFERENCE),
                oscillatory: set(OSCILLATORY),
                failure: set(FAILURE),
                old_data: set(OLD_DATA),
                inconsistent: set(INCONSISTENT),
                inaccurate: set(INACCURATE),
            },
            source: if set(SUBSTITUTED) {
                Source::Substituted
            } else {
                Source::Process
            },
            test: set(TEST),
            operator_blocked: set(OPERATOR_BLOCKED),
        }
    }

    pub fn to_bits(&self) -> u16 {
        let mut bits = match self.validity {
            Validity::Good => 0,
            Validity::Reserved => 1,
            Validity::Invalid => 2,
            Validity::Questionable => 3,
        };
        let flags = [
            (self.detail.overflow, OVERFLOW),
            (self.detail.out_of_range, OUT_OF_RANGE),
            (self.detail.bad_reference, BAD_REFERENCE),
            (self.detail.oscillatory, OSCILLATORY),
            (self.detail.failure, FAILURE),
            (self.detail.old_data, OLD_DATA),
            (self.detail.inconsistent, INCONSISTENT),
            (self.detail.inaccurate, INACCURATE),
            (self.source == Source::Substituted, SUBSTITUTED),
            (self.test, TEST),
            (self.operator_blocked, OPERATOR_BLOCKED),
        ];
        for (raised, mask) in flags {
            if raised {
                bits |= mask;
            }
        }
        bits
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::good()
    }
}
