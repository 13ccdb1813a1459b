//! # iecgate-gateway
//!
//! Wires the connection pool, the data mapper and the command tracker to a
//! [`ReadingSink`].
//!
//! ```no_run
//! use iecgate_client::tcp::TcpConnector;
//! use iecgate_core::config::GatewayConfig;
//! use iecgate_gateway::{Gateway, JsonLinesSink};
//! use std::sync::Arc;
//!
//! # async fn run() -> iecgate_core::error::Result<()> {
//! let config = GatewayConfig::from_file("config/iecgate.yaml")?;
//! let gateway = Gateway::new(
//!     &config,
//!     Arc::new(TcpConnector::default()),
//!     Arc::new(JsonLinesSink::stdout()),
//! )?;
//! gateway.start()?;
//! # Ok(())
//! # }
//! ```

pub mod gateway;
pub mod sink;
pub mod status;

pub use gateway::{Gateway, OPERATION_CONNECTION_STATUS, OPERATION_PIVOT_COMMAND};
pub use sink::{ChannelSink, JsonLinesSink, ReadingSink, SinkRecord};
pub use status::ConnectionStatus;
