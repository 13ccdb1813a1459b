//! Pivot timestamps.
//!
//! Seconds since the epoch plus a 24-bit binary fraction of a second, as in
//! the IEC 61850 UtcTime.

use serde::Serialize;

const FRACTION_SCALE: u64 = 1 << 24;

const LEAP_SECOND_KNOWN: u8 = 0x80;
const CLOCK_FAILURE: u8 = 0x40;
const CLOCK_NOT_SYNCHRONIZED: u8 = 0x20;
const ACCURACY_MASK: u8 = 0x1f;

/// Time quality octet of a UtcTime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeQuality {
    pub clock_failure: bool,
    pub leap_second_known: bool,
    pub clock_not_synchronized: bool,
    /// Number of significant fraction bits
    pub time_accuracy: u8,
}

impl TimeQuality {
    pub fn from_octet(octet: u8) -> Self {
        Self {
            clock_failure: octet & CLOCK_FAILURE != 0,
            leap_second_known: octet & LEAP_SECOND_KNOWN != 0,
            clock_not_synchronized: octet & CLOCK_NOT_SYNCHRONIZED != 0,
            time_accuracy: octet & ACCURACY_MASK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PivotTimestamp {
    #[serde(rename = "SecondSinceEpoch")]
    pub second_since_epoch: u32,
    #[serde(rename = "FractionOfSecond")]
    pub fraction_of_second: u32,
    #[serde(rename = "TimeQuality")]
    pub time_quality: TimeQuality,
}

impl PivotTimestamp {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            second_since_epoch: (ms / 1000) as u32,
            fraction_of_second: ((ms % 1000) * FRACTION_SCALE / 1000) as u32,
            time_quality: TimeQuality::default(),
        }
    }

    /// Decode the 8-byte UtcTime: seconds (4 bytes BE), fraction (3 bytes
    /// BE), time quality (1 byte)
    pub fn from_utc_time(raw: &[u8; 8]) -> Self {
        let second_since_epoch = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let fraction_of_second = u32::from_be_bytes([0, raw[4], raw[5], raw[6]]);
        Self {
            second_since_epoch,
            fraction_of_second,
            time_quality: TimeQuality::from_octet(raw[7]),
        }
    }

    /// Local wall clock
    pub fn now() -> Self {
        Self::from_millis(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Milliseconds since the epoch, fraction rounded to the nearest ms
    pub fn to_millis(&self) -> u64 {
        let fraction_ms =
            (self.fraction_of_second as u64 * 1000 + FRACTION_SCALE / 2) / FRACTION_SCALE;
        self.second_since_epoch as u64 * 1000 + fraction_ms
    }
}
