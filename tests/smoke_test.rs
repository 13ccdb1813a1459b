//! Smoke test of the shipped configuration against simulated IEDs

use iecgate_client::sim::SimulatedConnector;
use iecgate_core::config::GatewayConfig;
use iecgate_gateway::{ChannelSink, ConnectionStatus, Gateway, SinkRecord, OPERATION_PIVOT_COMMAND};
use iecgate_pivot::Cause;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::assert_ok;

fn shipped_config() -> GatewayConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/iecgate.yaml");
    let mut config = assert_ok!(GatewayConfig::from_file(path));
    assert_ok!(config.validate());

    config.tunables.monitoring_period_ms = 50;
    config.tunables.reconnect_backoff_ms = 50;
    config.tunables.poll_interval_ms = 10;
    config.tunables.command_timeout_ms = 1_000;
    config
}

async fn next(records: &mut UnboundedReceiver<SinkRecord>) -> SinkRecord {
    tokio::time::timeout(Duration::from_secs(3), records.recv())
        .await
        .expect("no record in time")
        .expect("sink closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simulated_gateway_round_trip() {
    let config = shipped_config();
    let (connector, ieds) =
        SimulatedConnector::for_endpoints(&config.endpoints(), &config.descriptors());
    let (sink, mut records) = ChannelSink::new();

    let gateway = assert_ok!(Gateway::new(&config, Arc::new(connector), Arc::new(sink)));
    assert_ok!(gateway.start());

    // Activation, then the interrogation snapshot
    assert_eq!(next(&mut records).await, SinkRecord::Status(ConnectionStatus::Started));
    let SinkRecord::Reading(reading) = next(&mut records).await else {
        panic!("expected the interrogation reading");
    };
    assert_eq!(reading.datapoints.len(), config.datapoints.len());
    assert!(reading
        .datapoints
        .iter()
        .all(|dp| dp.object().cause == Cause::Interrogated));

    let json = serde_json::to_value(&reading).unwrap();
    let ts1 = json["datapoints"]
        .as_array()
        .unwrap()
        .iter()
        .find(|dp| dp["label"] == "TS1")
        .unwrap();
    assert_eq!(ts1["PIVOT"]["GTIS"]["SpsTyp"]["stVal"], false);
    assert_eq!(ts1["PIVOT"]["GTIS"]["Cause"]["stVal"], 20);

    // Normal security: the confirmation completes the command
    assert_ok!(
        gateway
            .operation(
                OPERATION_PIVOT_COMMAND,
                &[r#"{"PIVOT":{"GTIC":{"Identifier":"TC1","SpcTyp":{"ctlVal":true}}}}"#.to_string()],
            )
            .await
    );
    let SinkRecord::Ack(ack) = next(&mut records).await else {
        panic!("expected an acknowledgment");
    };
    assert_eq!((ack.label.as_str(), ack.terminated, ack.success), ("TC1", false, true));

    // Enhanced security: the termination completes the command
    assert_ok!(
        gateway
            .operation(
                OPERATION_PIVOT_COMMAND,
                &[r#"{"PIVOT":{"GTIC":{"Identifier":"TC2","SpcTyp":{"ctlVal":true}}}}"#.to_string()],
            )
            .await
    );
    let SinkRecord::Ack(ack) = next(&mut records).await else {
        panic!("expected an acknowledgment");
    };
    assert_eq!((ack.label.as_str(), ack.terminated, ack.success), ("TC2", true, true));

    assert_eq!(ieds[0].calls().len(), 3);
    assert!(ieds[1].calls().is_empty());

    gateway.stop().await;
    assert_eq!(next(&mut records).await, SinkRecord::Status(ConnectionStatus::NotConnected));
}
