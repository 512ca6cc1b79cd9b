//! TCP broker server.
//!
//! Each accepted socket becomes a client of an inner [`MemoryBroker`], so
//! socket clients and in-process clients share one subscriber table.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BusError, BusResult};
use crate::frame::{Frame, DEFAULT_MAX_FRAME_LEN};
use crate::memory::{MemoryBroker, MemoryTransport};
use crate::transport::{Inbox, Transport};

/// Default maximum number of concurrent socket clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Outbound frames queued per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Broker server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum accepted frame length in bytes.
    pub max_frame_len: usize,
    /// Maximum number of concurrent socket clients.
    pub max_connections: usize,
}

impl BrokerConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Sets the maximum frame length.
    #[must_use]
    pub const fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Sets the maximum number of concurrent clients.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish/subscribe broker listening on a TCP socket.
#[derive(Debug)]
pub struct BrokerServer {
    listener: TcpListener,
    broker: MemoryBroker,
    config: BrokerConfig,
}

impl BrokerServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::BindFailed`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: BrokerConfig) -> BusResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BusError::BindFailed(addr, e))?;
        Ok(Self {
            listener,
            broker: MemoryBroker::new(),
            config,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] if the socket address cannot be read.
    pub fn local_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The in-process broker behind the socket clients.
    #[must_use]
    pub const fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Currently only returns `Ok`; accept failures are logged and skipped.
    pub async fn serve(self, shutdown: CancellationToken) -> BusResult<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "broker listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.handle_connection(stream, peer, &shutdown),
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                () = shutdown.cancelled() => {
                    info!("broker shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        let connected = self.broker.client_count();
        if connected >= self.config.max_connections {
            warn!(
                peer = %peer,
                current = connected,
                max = self.config.max_connections,
                "connection rejected: max connections reached"
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "could not disable nagle");
        }

        let (transport, inbox) = self.broker.connect(peer.to_string());
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(self.config.max_frame_len));
        let shutdown = shutdown.child_token();

        tokio::spawn(async move {
            debug!(peer = %peer, "client connected");
            match run_session(framed, &transport, inbox, shutdown).await {
                Ok(()) => debug!(peer = %peer, "client disconnected"),
                Err(e) => debug!(peer = %peer, error = %e, "client session ended with error"),
            }
            transport.close();
        });
    }
}

/// Pumps one socket: client frames into the broker, broker messages out.
async fn run_session(
    framed: Framed<TcpStream, LinesCodec>,
    transport: &MemoryTransport,
    mut inbox: Inbox,
    shutdown: CancellationToken,
) -> BusResult<()> {
    let (mut sink, mut frames) = framed.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let line = frame.to_line()?;
            sink.send(line).await?;
        }
        Ok::<(), BusError>(())
    });

    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(envelope) = inbox.recv().await {
            let payload = match String::from_utf8(envelope.payload) {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            let frame = Frame::Message {
                topic: envelope.topic,
                payload,
            };
            if forward_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let result = loop {
        let line = tokio::select! {
            line = frames.next() => line,
            () = shutdown.cancelled() => break Ok(()),
        };
        let Some(line) = line else { break Ok(()) };
        let line = match line {
            Ok(line) => line,
            Err(e) => break Err(BusError::from(e)),
        };

        let reply = match Frame::from_line(&line) {
            Ok(Frame::Subscribe { filter }) => match transport.subscribe(&filter).await {
                Ok(()) => Some(Frame::SubAck { filter }),
                Err(e) => Some(Frame::Error {
                    reason: e.to_string(),
                }),
            },
            Ok(Frame::Publish { topic, payload }) => {
                match transport.publish(&topic, payload.into_bytes()).await {
                    Ok(()) => None,
                    Err(e) => Some(Frame::Error {
                        reason: e.to_string(),
                    }),
                }
            }
            Ok(other) => Some(Frame::Error {
                reason: format!("unexpected frame from client: {other:?}"),
            }),
            Err(e) => Some(Frame::Error {
                reason: e.to_string(),
            }),
        };

        if let Some(reply) = reply {
            if out_tx.send(reply).await.is_err() {
                break Err(BusError::Disconnected);
            }
        }
    };

    forwarder.abort();
    drop(out_tx);
    match writer.await {
        Ok(Ok(())) | Err(_) => {}
        Ok(Err(e)) => debug!(error = %e, "writer ended with error"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpTransport;
    use std::time::Duration;

    async fn start_broker() -> (SocketAddr, MemoryBroker, CancellationToken) {
        let server = BrokerServer::bind("127.0.0.1:0".parse().unwrap(), BrokerConfig::new())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let broker = server.broker().clone();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(shutdown.clone()));
        (addr, broker, shutdown)
    }

    async fn recv(inbox: &mut Inbox) -> crate::Envelope {
        tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("timed out waiting for message")
            .expect("inbox closed")
    }

    #[tokio::test]
    async fn socket_clients_exchange_messages() {
        let (addr, _broker, shutdown) = start_broker().await;

        let (coordinator, mut coordinator_inbox) =
            TcpTransport::connect(addr, "coordinator").await.unwrap();
        let (worker, mut worker_inbox) = TcpTransport::connect(addr, "M1").await.unwrap();

        worker.subscribe("/cfp").await.unwrap();
        coordinator.subscribe("/bids").await.unwrap();

        coordinator
            .publish("/cfp", br#"{"cfp_id":1,"job_type":"welding"}"#.to_vec())
            .await
            .unwrap();
        let cfp = recv(&mut worker_inbox).await;
        assert_eq!(cfp.topic, "/cfp");
        assert_eq!(cfp.payload, br#"{"cfp_id":1,"job_type":"welding"}"#.to_vec());

        worker
            .publish("/bids", br#"{"cfp_id":1,"worker_id":"M1","status":"reject"}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(recv(&mut coordinator_inbox).await.topic, "/bids");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn socket_and_in_process_clients_share_topics() {
        let (addr, broker, shutdown) = start_broker().await;

        let (remote, mut remote_inbox) = TcpTransport::connect(addr, "remote").await.unwrap();
        remote.subscribe("/assign/+").await.unwrap();

        let (local, _local_inbox) = broker.connect("local");
        local.publish("/assign/M2", br#"{"job_type":"painting","cfp_id":4}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(recv(&mut remote_inbox).await.topic, "/assign/M2");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_filter_is_refused_client_side() {
        let (addr, _broker, shutdown) = start_broker().await;
        let (client, _inbox) = TcpTransport::connect(addr, "c").await.unwrap();
        assert!(matches!(
            client.subscribe("/a/#/b").await,
            Err(BusError::InvalidFilter { .. })
        ));
        // The connection stays usable.
        client.subscribe("/cfp").await.unwrap();
        shutdown.cancel();
    }

    #[tokio::test]
    async fn client_disconnect_unregisters_from_broker() {
        let (addr, broker, shutdown) = start_broker().await;
        let (client, inbox) = TcpTransport::connect(addr, "short-lived").await.unwrap();
        client.subscribe("/cfp").await.unwrap();
        assert_eq!(broker.client_count(), 1);

        drop(client);
        drop(inbox);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while broker.client_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.client_count(), 0);
        shutdown.cancel();
    }

    #[test]
    fn config_builders() {
        let config = BrokerConfig::new()
            .with_max_frame_len(1024)
            .with_max_connections(2);
        assert_eq!(config.max_frame_len, 1024);
        assert_eq!(config.max_connections, 2);
        assert_eq!(BrokerConfig::default(), BrokerConfig::new());
    }
}
