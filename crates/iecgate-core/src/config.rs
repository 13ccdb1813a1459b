//! Configuration management for the iecgate gateway.
//!
//! This module provides the strongly typed configuration consumed by the
//! session manager:
//! - Loading from YAML files
//! - Environment variable overrides through the `config` crate
//! - Validation of endpoints, exchanged data and tunables

use crate::error::{ConfigError, Result};
use crate::types::{
    CommonDataClass, ConnectionEndpoint, ControlModel, ExchangeDataDescriptor, ObjectReference,
    OsiParameters, TlsParameters,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main gateway configuration.
///
/// # Examples
///
/// ```no_run
/// use iecgate_core::config::GatewayConfig;
///
/// let config = GatewayConfig::from_file("config/iecgate.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identification of the gateway and the remote IED
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Redundant connections, in priority order
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    /// TLS material shared by every connection
    #[serde(default)]
    pub tls: Option<TlsParameters>,

    /// Exchanged data
    #[serde(default)]
    pub datapoints: Vec<DatapointConfig>,

    /// Timing parameters
    #[serde(default)]
    pub tunables: TunablesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl GatewayConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, merging the file with
    /// `IECGATE__*` environment variables.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("IECGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// Checks for:
    /// - A non-empty IED name
    /// - At least one connection, each with a valid IP address and port
    /// - No duplicate endpoints
    /// - Unique datapoint labels and object references
    /// - Non-zero tunables
    pub fn validate(&self) -> Result<()> {
        if self.gateway.ied_name.trim().is_empty() {
            return Err(ConfigError::missing("ied_name").into());
        }

        if self.connections.is_empty() {
            return Err(ConfigError::NoConnections.into());
        }

        let mut seen_endpoints = HashSet::new();
        for connection in &self.connections {
            connection.validate()?;
            let endpoint = format!("{}:{}", connection.ip_addr, connection.port);
            if !seen_endpoints.insert(endpoint.clone()) {
                return Err(ConfigError::DuplicateEndpoint { endpoint }.into());
            }
        }

        if let Some(tls) = &self.tls {
            if tls.private_key.is_empty() {
                return Err(ConfigError::missing("tls.private_key").into());
            }
            if tls.own_cert.is_empty() {
                return Err(ConfigError::missing("tls.own_cert").into());
            }
        }

        let mut seen_labels = HashSet::new();
        let mut seen_references = HashSet::new();
        for datapoint in &self.datapoints {
            if datapoint.label.is_empty() {
                return Err(ConfigError::missing("label").into());
            }
            if datapoint.objref.is_empty() {
                return Err(ConfigError::missing("objref").into());
            }
            if !seen_labels.insert(datapoint.label.as_str()) {
                return Err(ConfigError::DuplicateLabel {
                    label: datapoint.label.clone(),
                }
                .into());
            }
            if !seen_references.insert(datapoint.objref.as_str()) {
                return Err(ConfigError::DuplicateReference {
                    reference: datapoint.objref.clone(),
                }
                .into());
            }
        }

        self.tunables.validate()?;
        self.logging.parse_level()?;

        Ok(())
    }

    /// Returns the connection endpoints in priority order.
    pub fn endpoints(&self) -> Vec<ConnectionEndpoint> {
        self.connections
            .iter()
            .enumerate()
            .map(|(priority, connection)| ConnectionEndpoint {
                address: connection.ip_addr.clone(),
                port: connection.port,
                priority,
                osi: connection.osi.clone(),
                tls: self.tls.clone(),
            })
            .collect()
    }

    /// Returns the exchange data descriptors.
    pub fn descriptors(&self) -> Vec<ExchangeDataDescriptor> {
        self.datapoints
            .iter()
            .map(DatapointConfig::to_descriptor)
            .collect()
    }
}

/// Gateway identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    /// Asset name used for readings
    #[serde(default = "default_asset_name")]
    pub asset_name: String,

    /// Name of the remote IED
    #[serde(default)]
    pub ied_name: String,
}

fn default_asset_name() -> String {
    "iec61850".to_string()
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            asset_name: default_asset_name(),
            ied_name: String::new(),
        }
    }
}

/// One redundant connection to the IED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server IP address
    pub ip_addr: String,

    /// MMS port
    #[serde(default = "default_mms_port")]
    pub port: u16,

    /// Optional OSI addressing
    #[serde(default)]
    pub osi: Option<OsiParameters>,
}

fn default_mms_port() -> u16 {
    102
}

impl ConnectionConfig {
    /// Validates address and port.
    pub fn validate(&self) -> Result<()> {
        if self.ip_addr.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidAddress {
                value: self.ip_addr.clone(),
            }
            .into());
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort {
                value: self.port.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// One exchanged datapoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatapointConfig {
    /// Label towards the pipeline
    pub label: String,

    /// Pivot identifier, defaults to the label
    #[serde(default)]
    pub pivot_id: Option<String>,

    /// Object reference on the IED
    pub objref: String,

    /// Common data class
    pub cdc: CommonDataClass,

    /// Control model, only used for controllable classes
    #[serde(default)]
    pub control_model: Option<ControlModel>,
}

impl DatapointConfig {
    fn to_descriptor(&self) -> ExchangeDataDescriptor {
        let control_model = match self.control_model {
            Some(model) => model,
            None if self.cdc.is_controllable() => ControlModel::DirectNormal,
            None => ControlModel::StatusOnly,
        };
        ExchangeDataDescriptor {
            label: self.label.clone(),
            pivot_id: self.pivot_id.clone().unwrap_or_else(|| self.label.clone()),
            reference: ObjectReference::new(self.objref.clone()),
            cdc: self.cdc,
            control_model,
        }
    }
}

/// Timing parameters of the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunablesConfig {
    /// Period of the pool monitoring loop
    #[serde(default = "default_monitoring_period_ms")]
    pub monitoring_period_ms: u64,

    /// Delay before a lost session tries again
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Bounded wait for command feedback
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Wake-up period of each session task
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for one connection attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for the general interrogation after an activation
    #[serde(default = "default_interrogation_timeout_ms")]
    pub interrogation_timeout_ms: u64,
}

fn default_monitoring_period_ms() -> u64 {
    500
}

fn default_reconnect_backoff_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_interrogation_timeout_ms() -> u64 {
    10_000
}

impl Default for TunablesConfig {
    fn default() -> Self {
        Self {
            monitoring_period_ms: default_monitoring_period_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            interrogation_timeout_ms: default_interrogation_timeout_ms(),
        }
    }
}

impl TunablesConfig {
    /// Rejects zero durations.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("tunables.monitoring_period_ms", self.monitoring_period_ms),
            ("tunables.command_timeout_ms", self.command_timeout_ms),
            ("tunables.poll_interval_ms", self.poll_interval_ms),
            ("tunables.connect_timeout_ms", self.connect_timeout_ms),
            (
                "tunables.interrogation_timeout_ms",
                self.interrogation_timeout_ms,
            ),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero").into());
            }
        }
        Ok(())
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn interrogation_timeout(&self) -> Duration {
        Duration::from_millis(self.interrogation_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::invalid("logging.level", format!("Invalid log level: {}", self.level))
                .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Listen address of the exporter
    #[serde(default = "default_metrics_address")]
    pub bind_address: SocketAddr,
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9184))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_metrics_address(),
        }
    }
}
