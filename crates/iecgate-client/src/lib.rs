//! # iecgate-client
//!
//! Connection sessions towards IEC 61850 servers (IEDs).
//!
//! A [`ConnectionSession`] owns one endpoint. Its private task connects,
//! watches the link, forwards value changes and command feedback, and retries
//! after a fixed backoff when the link is lost. Association rejections are
//! permanent and stop the retries.
//!
//! The MMS protocol engine sits behind the [`IedConnector`] and
//! [`IedConnection`] traits:
//!
//! - **tcp**: transport-level connector with socket tuning and loss detection
//! - **sim**: in-memory IED for tests and the simulation mode
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iecgate_client::{ConnectionSession, SessionConfig, tcp::TcpConnector};
//! use iecgate_core::{ConnectionEndpoint, SessionId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let session = ConnectionSession::new(
//!         SessionId(0),
//!         ConnectionEndpoint::new("192.168.1.10", 102, 0),
//!         SessionConfig::default(),
//!         Arc::new(TcpConnector::default()),
//!         tx,
//!     );
//!
//!     session.start();
//!     session.connect();
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod session;
pub mod sim;
pub mod state;
pub mod tcp;
pub mod transport;

pub use session::{ConnectionSession, SessionEvent};
pub use state::{ConnectionState, SessionCounters, SessionSnapshot};
pub use transport::{IedConnection, IedConnector, IedLink, SessionConfig, TransportEvent};
