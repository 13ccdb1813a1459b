use anyhow::{Context, Result};
use clap::Parser;
use iecgate_client::sim::SimulatedConnector;
use iecgate_client::tcp::TcpConnector;
use iecgate_client::IedConnector;
use iecgate_core::config::{GatewayConfig, LogFormat};
use iecgate_gateway::{Gateway, JsonLinesSink, OPERATION_CONNECTION_STATUS, OPERATION_PIVOT_COMMAND};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// iecgate - Redundant IEC 61850 client for the pivot pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "IECGATE_CONFIG", default_value = "config/iecgate.yaml")]
    config: PathBuf,

    /// Run against simulated IEDs instead of the network
    #[arg(long)]
    simulate: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the readings
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Lines on stdin are pivot commands, or the name of the status operation
async fn handle_line(gateway: &Gateway, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let result = if line == OPERATION_CONNECTION_STATUS {
        gateway.operation(OPERATION_CONNECTION_STATUS, &[]).await
    } else {
        gateway
            .operation(OPERATION_PIVOT_COMMAND, &[line.to_string()])
            .await
    };

    if let Err(e) = result {
        warn!(error = %e, "Operation rejected");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration file, IECGATE__* variables override it
    let config = GatewayConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, config.logging.format);

    config.validate().context("Invalid configuration")?;

    if config.metrics.enabled {
        iecgate_pool::install_exporter(config.metrics.bind_address)
            .context("Failed to install Prometheus exporter")?;
        info!(address = %config.metrics.bind_address, "Prometheus exporter listening");
    }

    let connector: Arc<dyn IedConnector> = if args.simulate {
        info!("Running against simulated IEDs");
        let (connector, _ieds) =
            SimulatedConnector::for_endpoints(&config.endpoints(), &config.descriptors());
        Arc::new(connector)
    } else {
        Arc::new(TcpConnector::default())
    };

    info!(
        ied = %config.gateway.ied_name,
        connections = config.connections.len(),
        datapoints = config.datapoints.len(),
        "Configuration loaded from {:?}",
        args.config
    );

    let gateway = Gateway::new(&config, connector, Arc::new(JsonLinesSink::stdout()))?;
    gateway.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping gateway...");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&gateway, &line).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    gateway.stop().await;
    Ok(())
}
