//! # iecgate-pool
//!
//! Redundant connection management towards one IED.
//!
//! The [`ConnectionPool`] owns one session per configured endpoint and keeps
//! at most one of them active. A monitoring loop revives idle sessions and
//! re-runs the election every period:
//!
//! - the current active session keeps its role while it stays connected
//! - otherwise the highest-priority connected session is activated
//! - sessions in `FatalError` never take part again
//!
//! Activation changes are published as [`PoolEvent`]s so the owner can
//! interrogate the newly active link.

pub mod metrics;
pub mod monitor;
pub mod pool;

pub use metrics::{install_exporter, PoolMetrics};
pub use monitor::PoolMonitor;
pub use pool::{ConnectionPool, PoolConfig, PoolEvent, PoolStats};
