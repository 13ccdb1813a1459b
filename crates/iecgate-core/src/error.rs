//! Error types for the iecgate gateway.
//!
//! Every failure in the session manager resolves to one of these variants and,
//! from there, to a state transition or a reported result. None of them is
//! meant to terminate the process.

use thiserror::Error;

/// Result type alias using GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Pool level unavailability
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Control command errors
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    /// Value mapping errors
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation name not handled by the gateway
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Errors raised by the protocol engine while establishing or using a link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// Failed to establish a connection
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// Connection was unexpectedly closed
    #[error("Connection closed unexpectedly: {reason}")]
    ConnectionClosed { reason: String },

    /// Connection was reset by peer
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// The peer rejected the association (ACSE/MMS initiate)
    #[error("Association rejected: {reason}")]
    AssociationRejected { reason: String },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// TLS handshake failed
    #[error("TLS handshake failed: {reason}")]
    TlsHandshakeFailed { reason: String },

    /// The link is not established
    #[error("Not connected")]
    NotConnected,

    /// The server refused or failed a service request
    #[error("Service '{service}' failed: {reason}")]
    ServiceFailed { service: String, reason: String },
}

impl ConnectionError {
    /// Creates a connection failed error.
    pub fn failed(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a service failure error.
    pub fn service(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceFailed {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        !self.is_permanent()
    }

    /// Returns true if this error is permanent and retrying won't help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConnectionError::AssociationRejected { .. }
                | ConnectionError::AuthenticationFailed { .. }
                | ConnectionError::TlsHandshakeFailed { .. }
        )
    }
}

/// Errors raised by the connection pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No session is currently active
    #[error("No active connection")]
    NoActiveConnection,

    /// The pool has no configured endpoints
    #[error("Pool has no endpoints")]
    NoEndpoints,

    /// The pool is already running
    #[error("Pool already started")]
    AlreadyStarted,
}

impl PoolError {
    /// Returns true if the caller should retry later rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::NoActiveConnection)
    }
}

/// Errors raised when a control request is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The object reference is not part of the exchanged data
    #[error("Unknown object reference: {reference}")]
    UnknownReference { reference: String },

    /// The object reference is configured but not controllable
    #[error("Object reference is not controllable: {reference}")]
    NotControllable { reference: String },

    /// A command for the same reference is still outstanding
    #[error("A command is already outstanding for {reference}")]
    DuplicateCommand { reference: String },

    /// The requested value does not match the common data class
    #[error("Invalid control value for {reference}: {reason}")]
    InvalidValue { reference: String, reason: String },

    /// No session is currently active
    #[error("No active connection")]
    NoActiveConnection,

    /// The server refused the command
    #[error("Command refused for {reference}: {reason}")]
    Refused { reference: String, reason: String },

    /// The command request could not be decoded
    #[error("Malformed command: {reason}")]
    Malformed { reason: String },
}

impl ControlError {
    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::NoActiveConnection | ControlError::DuplicateCommand { .. }
        )
    }
}

/// Errors raised while mapping a protocol value to a datapoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    /// The notification references an object that is not configured
    #[error("Unknown object reference: {reference}")]
    UnknownReference { reference: String },

    /// The value shape does not fit the configured common data class
    #[error("Value for {reference} does not fit {cdc}: got {found}")]
    TypeMismatch {
        reference: String,
        cdc: String,
        found: String,
    },
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Failed to load configuration file
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("the mandatory '{field}' not found")]
    MissingField { field: String },

    /// No connection configured
    #[error("'transport layer' has no connections")]
    NoConnections,

    /// Invalid IP address
    #[error("not a valid IP address for the mandatory 'ip_addr': {value}")]
    InvalidAddress { value: String },

    /// Invalid port
    #[error("bad format for the mandatory 'port': {value}")]
    InvalidPort { value: String },

    /// The same endpoint is configured twice
    #[error("Duplicate connection: {endpoint}")]
    DuplicateEndpoint { endpoint: String },

    /// Two datapoints share a label
    #[error("Duplicate datapoint label: {label}")]
    DuplicateLabel { label: String },

    /// Two datapoints share an object reference
    #[error("Duplicate object reference: {reference}")]
    DuplicateReference { reference: String },

    /// Invalid configuration value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
