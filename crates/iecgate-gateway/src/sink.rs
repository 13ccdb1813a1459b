//! Destinations for readings, acknowledgments and status events.

use crate::status::ConnectionStatus;
use iecgate_control::CommandAck;
use iecgate_pivot::{PivotDatapoint, Reading};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Receives everything the gateway produces.
///
/// Calls happen on the router task and must not block.
pub trait ReadingSink: Send + Sync {
    fn ingest(&self, asset: &str, datapoints: Vec<PivotDatapoint>);

    /// Command outcome, ingested as a `GTIC` datapoint by default
    fn acknowledge(&self, asset: &str, ack: &CommandAck) {
        self.ingest(asset, vec![ack.to_pivot()]);
    }

    fn connection_status(&self, asset: &str, status: ConnectionStatus);
}

/// Item delivered by a [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Reading(Reading),
    Ack(CommandAck),
    Status(ConnectionStatus),
}

/// Forwards every item to a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<SinkRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SinkRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, record: SinkRecord) {
        if self.tx.send(record).is_err() {
            warn!("Sink receiver dropped");
        }
    }
}

impl ReadingSink for ChannelSink {
    fn ingest(&self, asset: &str, datapoints: Vec<PivotDatapoint>) {
        self.send(SinkRecord::Reading(Reading {
            asset: asset.to_string(),
            datapoints,
        }));
    }

    fn acknowledge(&self, _asset: &str, ack: &CommandAck) {
        self.send(SinkRecord::Ack(ack.clone()));
    }

    fn connection_status(&self, _asset: &str, status: ConnectionStatus) {
        self.send(SinkRecord::Status(status));
    }
}

/// Writes one JSON document per line
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_line<T: Serialize>(&self, value: &T) {
        let mut out = self.out.lock();
        let result = serde_json::to_writer(&mut *out, value)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(out))
            .and_then(|_| out.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to write JSON line");
        }
    }
}

impl ReadingSink for JsonLinesSink {
    fn ingest(&self, asset: &str, datapoints: Vec<PivotDatapoint>) {
        self.write_line(&Reading {
            asset: asset.to_string(),
            datapoints,
        });
    }

    fn connection_status(&self, asset: &str, status: ConnectionStatus) {
        self.write_line(&status.event(asset));
    }
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn lines(&self) -> Vec<serde_json::Value> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    #[test]
    fn test_json_lines() {
        let buffer = Buffer::default();
        let sink = JsonLinesSink::new(Box::new(buffer.clone()));

        sink.ingest(
            "iec61850",
            vec![PivotDatapoint::command_ack("TC1", "ID-TC1", true, true)],
        );
        sink.connection_status("iec61850", ConnectionStatus::Started);

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["asset"], "iec61850");
        assert_eq!(
            lines[0]["datapoints"][0]["PIVOT"]["GTIC"]["Identifier"],
            "ID-TC1"
        );
        assert_eq!(lines[1]["south_event"]["connx_status"], "started");
    }

    #[test]
    fn test_channel_sink_records() {
        let (sink, mut rx) = ChannelSink::new();
        sink.ingest("iec61850", Vec::new());
        sink.connection_status("iec61850", ConnectionStatus::NotConnected);

        assert!(matches!(rx.try_recv().unwrap(), SinkRecord::Reading(r) if r.asset == "iec61850"));
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkRecord::Status(ConnectionStatus::NotConnected)
        );
    }
}
