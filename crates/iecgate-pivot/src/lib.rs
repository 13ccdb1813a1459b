//! # iecgate-pivot
//!
//! Pivot representation of IEC 61850 data.
//!
//! - **quality**: decoding of the IEC 61850 quality bit string
//! - **timestamp**: UtcTime and millisecond timestamps
//! - **datapoint**: serde model of the pivot datapoints (`GTIS`, `GTIM`, `GTIC`)
//! - **mapper**: value reports to readings, per configured exchanged data
//! - **command**: incoming `GTIC` control commands

pub mod command;
pub mod datapoint;
pub mod exchange;
pub mod mapper;
pub mod quality;
pub mod timestamp;

pub use command::PivotCommand;
pub use datapoint::{Cause, PivotDatapoint, Reading};
pub use exchange::ExchangeData;
pub use mapper::DataMapper;
pub use quality::Quality;
pub use timestamp::PivotTimestamp;
