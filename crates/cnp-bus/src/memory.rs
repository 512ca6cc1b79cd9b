//! In-process fan-out broker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{BusError, BusResult};
use crate::filter::{validate_topic, TopicFilter};
use crate::transport::{BusFuture, Envelope, Inbox, Transport};

/// Default per-client inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

type ClientKey = u64;

#[derive(Debug)]
struct ClientEntry {
    client_id: String,
    filters: Vec<TopicFilter>,
    sender: mpsc::Sender<Envelope>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    clients: HashMap<ClientKey, ClientEntry>,
    next_key: ClientKey,
}

/// In-process publish/subscribe broker.
///
/// Cloning is cheap; clones share the same subscriber table.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<RwLock<BrokerInner>>,
    inbox_capacity: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    /// Creates a broker whose client inboxes hold up to `capacity` messages.
    #[must_use]
    pub fn with_inbox_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BrokerInner::default())),
            inbox_capacity: capacity.max(1),
        }
    }

    /// Connects a new client.
    pub fn connect(&self, client_id: impl Into<String>) -> (MemoryTransport, Inbox) {
        let client_id = client_id.into();
        let (sender, receiver) = mpsc::channel(self.inbox_capacity);

        let key = {
            let mut inner = self.inner.write();
            let key = inner.next_key;
            inner.next_key += 1;
            inner.clients.insert(
                key,
                ClientEntry {
                    client_id: client_id.clone(),
                    filters: Vec::new(),
                    sender,
                },
            );
            key
        };

        debug!(client = %client_id, "client connected");
        let transport = MemoryTransport {
            broker: self.clone(),
            key,
            client_id,
        };
        (transport, Inbox::new(receiver))
    }

    /// Drops every connection registered under `client_id`.
    ///
    /// Their inboxes close and further publishes fail with
    /// [`BusError::Disconnected`]. Returns the number of dropped connections.
    pub fn disconnect(&self, client_id: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.clients.len();
        inner.clients.retain(|_, c| c.client_id != client_id);
        let dropped = before - inner.clients.len();
        if dropped > 0 {
            debug!(client = %client_id, dropped, "client disconnected");
        }
        dropped
    }

    /// Returns the number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    /// Publishes on behalf of the broker itself.
    ///
    /// Returns the number of clients the message was delivered to.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidTopic`] if the topic is not publishable.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<usize> {
        validate_topic(topic)?;

        let targets: Vec<(ClientKey, mpsc::Sender<Envelope>)> = {
            let inner = self.inner.read();
            inner
                .clients
                .iter()
                .filter(|(_, c)| c.filters.iter().any(|f| f.matches(topic)))
                .map(|(key, c)| (*key, c.sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (key, sender) in targets {
            let envelope = Envelope::new(topic, payload.clone());
            if sender.send(envelope).await.is_ok() {
                delivered += 1;
            } else {
                closed.push(key);
            }
        }

        if !closed.is_empty() {
            let mut inner = self.inner.write();
            for key in closed {
                inner.clients.remove(&key);
            }
        }

        trace!(topic, delivered, "published");
        Ok(delivered)
    }

    fn is_connected(&self, key: ClientKey) -> bool {
        self.inner.read().clients.contains_key(&key)
    }

    fn add_filter(&self, key: ClientKey, filter: TopicFilter) -> BusResult<()> {
        let mut inner = self.inner.write();
        let client = inner.clients.get_mut(&key).ok_or(BusError::Disconnected)?;
        if !client.filters.contains(&filter) {
            client.filters.push(filter);
        }
        Ok(())
    }

    fn remove(&self, key: ClientKey) {
        self.inner.write().clients.remove(&key);
    }
}

/// A client connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    key: ClientKey,
    client_id: String,
}

impl MemoryTransport {
    /// Closes this connection; its inbox ends once drained.
    pub fn close(&self) {
        self.broker.remove(self.key);
    }

    /// Returns true while the connection is registered with the broker.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.broker.is_connected(self.key)
    }
}

impl Transport for MemoryTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(BusError::Disconnected);
            }
            self.broker.publish(topic, payload).await.map(|_| ())
        })
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let filter = TopicFilter::parse(filter)?;
            debug!(client = %self.client_id, filter = %filter, "subscribed");
            self.broker.add_filter(self.key, filter)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_every_matching_subscriber() {
        let broker = MemoryBroker::new();
        let (publisher, _p) = broker.connect("coordinator");
        let (w1, mut in1) = broker.connect("W1");
        let (w2, mut in2) = broker.connect("W2");
        let (_w3, mut in3) = broker.connect("W3");

        w1.subscribe("/cfp").await.unwrap();
        w2.subscribe("/cfp").await.unwrap();

        publisher.publish("/cfp", b"{}".to_vec()).await.unwrap();

        assert_eq!(in1.recv().await.unwrap().topic, "/cfp");
        assert_eq!(in2.recv().await.unwrap().topic, "/cfp");
        assert!(in3.try_recv().is_none());
    }

    #[tokio::test]
    async fn overlapping_filters_deliver_once() {
        let broker = MemoryBroker::new();
        let (client, mut inbox) = broker.connect("probe");
        client.subscribe("/assign/+").await.unwrap();
        client.subscribe("#").await.unwrap();
        client.subscribe("/assign/+").await.unwrap();

        let delivered = broker.publish("/assign/M1", b"{}".to_vec()).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(inbox.drain().len(), 1);
    }

    #[tokio::test]
    async fn per_subscriber_order_is_publish_order() {
        let broker = MemoryBroker::new();
        let (publisher, _p) = broker.connect("pub");
        let (sub, mut inbox) = broker.connect("sub");
        sub.subscribe("/bids").await.unwrap();

        for i in 0..50u8 {
            publisher.publish("/bids", vec![i]).await.unwrap();
        }

        let payloads: Vec<u8> = inbox.drain().into_iter().map(|e| e.payload[0]).collect();
        assert_eq!(payloads, (0..50u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn publish_rejects_wildcard_topics() {
        let broker = MemoryBroker::new();
        let (client, _inbox) = broker.connect("c");
        let err = client.publish("/assign/+", Vec::new()).await.unwrap_err();
        assert!(matches!(err, BusError::InvalidTopic { .. }));
    }

    #[tokio::test]
    async fn disconnect_closes_inbox_and_fails_publish() {
        let broker = MemoryBroker::new();
        let (client, mut inbox) = broker.connect("M1");
        client.subscribe("/cfp").await.unwrap();

        assert_eq!(broker.disconnect("M1"), 1);
        assert!(!client.is_connected());
        assert!(inbox.recv().await.is_none());
        assert!(matches!(
            client.publish("/bids", Vec::new()).await,
            Err(BusError::Disconnected)
        ));
        assert!(matches!(
            client.subscribe("/cfp").await,
            Err(BusError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn dropped_inbox_is_pruned_on_publish() {
        let broker = MemoryBroker::new();
        let (client, inbox) = broker.connect("gone");
        client.subscribe("/cfp").await.unwrap();
        drop(inbox);

        let delivered = broker.publish("/cfp", Vec::new()).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn close_only_affects_one_connection() {
        let broker = MemoryBroker::new();
        let (a, _ia) = broker.connect("same");
        let (b, _ib) = broker.connect("same");
        a.close();
        assert!(!a.is_connected());
        assert!(b.is_connected());
        assert_eq!(broker.client_count(), 1);
    }
}
