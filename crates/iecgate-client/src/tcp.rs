//! TCP link connector.
//!
//! Opens and supervises the transport connection to an IED (ISO-on-TCP,
//! port 102 by default). The socket is tuned like every long-lived link in
//! the gateway: no Nagle delay and TCP keepalive so a silent peer loss is
//! detected by the kernel. Link loss is reported as [`TransportEvent::Closed`].
//!
//! MMS services require a protocol engine on top of the socket; without one
//! the control and interrogation services fail with a service error.

use crate::transport::{IedConnection, IedConnector, IedLink, TransportEvent};
use async_trait::async_trait;
use iecgate_core::error::ConnectionError;
use iecgate_core::{ConnectionEndpoint, ControlValue, ObjectReference, ValueReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// TCP socket options
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Idle time before keepalive probes are sent, `None` disables keepalive
    pub keepalive: Option<Duration>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}

/// Connector opening plain TCP links
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    options: TcpOptions,
}

impl TcpConnector {
    pub fn new(options: TcpOptions) -> Self {
        Self { options }
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.options.nodelay)?;
        if let Some(idle) = self.options.keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(idle);
            socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }
}

#[async_trait]
impl IedConnector for TcpConnector {
    async fn connect(&self, endpoint: &ConnectionEndpoint) -> Result<IedLink, ConnectionError> {
        if endpoint.tls.is_some() {
            return Err(ConnectionError::TlsHandshakeFailed {
                reason: "TLS requires a protocol engine".to_string(),
            });
        }

        let stream = TcpStream::connect(endpoint.socket_address())
            .await
            .map_err(|e| ConnectionError::failed(&endpoint.address, endpoint.port, e.to_string()))?;

        self.configure(&stream)
            .map_err(|e| ConnectionError::failed(&endpoint.address, endpoint.port, e.to_string()))?;

        debug!(endpoint = %endpoint, "TCP link established");

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(watch_link(stream, tx, shutdown.clone()));

        Ok(IedLink {
            connection: Arc::new(TcpConnection {
                endpoint: endpoint.socket_address(),
                shutdown,
            }),
            events: rx,
        })
    }
}

/// Read until the peer goes away, then report the loss
async fn watch_link(
    mut stream: TcpStream,
    events: UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let mut buf = [0u8; 4096];
    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => return,
            read = stream.read(&mut buf) => read,
        };

        let reason = match read {
            Ok(0) => "peer closed the connection".to_string(),
            Ok(n) => {
                debug!(bytes = n, "Discarding unsolicited data");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "TCP link read failed");
                e.to_string()
            }
        };

        let _ = events.send(TransportEvent::Closed { reason });
        return;
    }
}

struct TcpConnection {
    endpoint: String,
    shutdown: CancellationToken,
}

impl TcpConnection {
    fn unavailable(&self, service: &str) -> ConnectionError {
        if self.shutdown.is_cancelled() {
            return ConnectionError::NotConnected;
        }
        ConnectionError::service(
            service,
            format!("no MMS engine attached to {}", self.endpoint),
        )
    }
}

#[async_trait]
impl IedConnection for TcpConnection {
    async fn select(
        &self,
        _reference: &ObjectReference,
        _value: Option<&ControlValue>,
    ) -> Result<(), ConnectionError> {
        Err(self.unavailable("select"))
    }

    async fn operate(
        &self,
        _reference: &ObjectReference,
        _value: &ControlValue,
    ) -> Result<(), ConnectionError> {
        Err(self.unavailable("operate"))
    }

    async fn general_interrogation(&self) -> Result<Vec<ValueReport>, ConnectionError> {
        Err(self.unavailable("general interrogation"))
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}
