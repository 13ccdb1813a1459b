//! # iecgate-control
//!
//! Control command state machine.
//!
//! Commands are validated against the exchanged data, issued on the active
//! session according to the object's control model and tracked until the
//! server confirms, terminates or the command times out.

pub mod model;
pub mod tracker;

pub use model::{CommandPhase, IssueCommand};
pub use tracker::{ActiveLink, AckCause, CommandAck, CommandTracker, ControlRequest};
