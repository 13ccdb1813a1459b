//! # iecgate Core
//!
//! Core types, error handling, and configuration for the iecgate IEC 61850
//! client gateway.
//!
//! This crate provides the foundational building blocks shared by every other
//! crate in the workspace:
//!
//! - **Types**: object references, common data classes, control models,
//!   session identifiers and connection endpoints.
//! - **Values**: raw values, control values and command feedback exchanged
//!   with the protocol engine.
//! - **Errors**: `thiserror` based error types for connection, pool, control,
//!   mapping and configuration failures.
//! - **Configuration**: YAML configuration with environment overrides and
//!   validation.
//!
//! ## Example
//!
//! ```
//! use iecgate_core::config::GatewayConfig;
//!
//! let yaml = r#"
//! gateway:
//!   ied_name: simpleIO
//! connections:
//!   - ip_addr: 127.0.0.1
//!     port: 102
//! datapoints:
//!   - label: TS1
//!     objref: simpleIOGenericIO/GGIO1.SPCSO1
//!     cdc: SpcTyp
//! "#;
//!
//! let config = GatewayConfig::from_yaml(yaml).unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.endpoints().len(), 1);
//! ```

pub mod config;
pub mod error;
pub mod types;
pub mod values;

// Re-export commonly used types for convenience
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use types::{
    CommonDataClass, ConnectionEndpoint, ControlModel, ExchangeDataDescriptor, ObjectReference,
    SessionId,
};
pub use values::{CommandFeedback, ControlValue, RawValue, ValueReport};
