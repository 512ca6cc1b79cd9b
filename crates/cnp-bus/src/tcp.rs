//! TCP client for [`BrokerServer`](crate::broker::BrokerServer).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::error::{BusError, BusResult};
use crate::filter::{validate_topic, TopicFilter};
use crate::frame::{Frame, DEFAULT_MAX_FRAME_LEN};
use crate::memory::DEFAULT_INBOX_CAPACITY;
use crate::transport::{BusFuture, Envelope, Inbox, Transport};

/// How long a subscription waits for the broker's acknowledgement.
pub const SUB_ACK_TIMEOUT: Duration = Duration::from_secs(5);

type FrameSink = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type FrameStream = SplitStream<Framed<TcpStream, LinesCodec>>;
type PendingAcks = Arc<parking_lot::Mutex<VecDeque<oneshot::Sender<()>>>>;

/// Client connection to a TCP broker.
///
/// Subscriptions are acknowledged by the broker in request order, so a
/// resolved [`Transport::subscribe`] means the filter is live.
pub struct TcpTransport {
    client_id: String,
    writer: tokio::sync::Mutex<FrameSink>,
    pending_acks: PendingAcks,
    reader: JoinHandle<()>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("client_id", &self.client_id)
            .field("pending_acks", &self.pending_acks.lock().len())
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Connects to the broker at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] if the connection cannot be established.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        client_id: impl Into<String>,
    ) -> BusResult<(Self, Inbox)> {
        Self::connect_with(addr, client_id, DEFAULT_MAX_FRAME_LEN, DEFAULT_INBOX_CAPACITY).await
    }

    /// Connects with explicit frame and inbox limits.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] if the connection cannot be established.
    pub async fn connect_with(
        addr: impl ToSocketAddrs,
        client_id: impl Into<String>,
        max_frame_len: usize,
        inbox_capacity: usize,
    ) -> BusResult<(Self, Inbox)> {
        let client_id = client_id.into();
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let framed = Framed::new(stream, LinesCodec::new_with_max_length(max_frame_len));
        let (sink, frames) = framed.split();
        let (sender, receiver) = mpsc::channel(inbox_capacity.max(1));
        let pending_acks: PendingAcks = Arc::default();

        let reader = tokio::spawn(read_loop(
            client_id.clone(),
            frames,
            sender,
            Arc::clone(&pending_acks),
        ));

        debug!(client = %client_id, broker = %peer, "connected to broker");
        let transport = Self {
            client_id,
            writer: tokio::sync::Mutex::new(sink),
            pending_acks,
            reader,
        };
        Ok((transport, Inbox::new(receiver)))
    }

    async fn send_frame(&self, frame: &Frame) -> BusResult<()> {
        let line = frame.to_line()?;
        self.writer.lock().await.send(line).await?;
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transport for TcpTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()> {
        Box::pin(async move {
            validate_topic(topic)?;
            if self.reader.is_finished() {
                return Err(BusError::Disconnected);
            }
            self.send_frame(&Frame::publish(topic, payload)?).await
        })
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let filter = TopicFilter::parse(filter)?;
            let (ack_tx, ack_rx) = oneshot::channel();
            let frame = Frame::Subscribe {
                filter: filter.as_str().to_string(),
            };
            let line = frame.to_line()?;

            {
                // Enqueue under the writer lock so acks line up with request order.
                let mut writer = self.writer.lock().await;
                self.pending_acks.lock().push_back(ack_tx);
                writer.send(line).await?;
            }

            match tokio::time::timeout(SUB_ACK_TIMEOUT, ack_rx).await {
                Ok(Ok(())) => {
                    debug!(client = %self.client_id, filter = %filter, "subscribed");
                    Ok(())
                }
                Ok(Err(_)) => Err(BusError::Disconnected),
                Err(_) => Err(BusError::Timeout("subscription acknowledgement")),
            }
        })
    }
}

async fn read_loop(
    client_id: String,
    mut frames: FrameStream,
    inbox: mpsc::Sender<Envelope>,
    pending_acks: PendingAcks,
) {
    while let Some(line) = frames.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(client = %client_id, error = %e, "broker stream failed");
                break;
            }
        };

        match Frame::from_line(&line) {
            Ok(Frame::Message { topic, payload }) => {
                if inbox
                    .send(Envelope::new(topic, payload.into_bytes()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Frame::SubAck { filter }) => {
                let waiter = pending_acks.lock().pop_front();
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(());
                    }
                    None => debug!(client = %client_id, filter, "unsolicited sub_ack"),
                }
            }
            Ok(Frame::Error { reason }) => {
                warn!(client = %client_id, reason, "broker refused frame");
            }
            Ok(other) => debug!(client = %client_id, frame = ?other, "ignoring client frame from broker"),
            Err(e) => debug!(client = %client_id, error = %e, "dropping undecodable frame"),
        }
    }

    pending_acks.lock().clear();
    debug!(client = %client_id, "broker connection closed");
}
