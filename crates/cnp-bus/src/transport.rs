//! The publish/subscribe seam agents are written against.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::BusResult;

/// Boxed future returned by [`Transport`] operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = BusResult<T>> + Send + 'a>>;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Encoded message body.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Client side of a publish/subscribe connection.
///
/// Messages for every subscription of a client arrive, in publish order,
/// on the single [`Inbox`] returned when the client connected.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Identifier this client connected with.
    fn client_id(&self) -> &str;

    /// Publishes `payload` to every subscriber whose filter matches `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the client is
    /// disconnected.
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()>;

    /// Adds a subscription filter. Once this resolves, matching messages
    /// published afterwards are delivered to the inbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter is invalid or the client is
    /// disconnected.
    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()>;
}

/// Receiving half of a client connection.
#[derive(Debug)]
pub struct Inbox {
    receiver: mpsc::Receiver<Envelope>,
}

impl Inbox {
    /// Wraps a channel receiver.
    #[must_use]
    pub const fn new(receiver: mpsc::Receiver<Envelope>) -> Self {
        Self { receiver }
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the connection is gone; agents treat that as a
    /// fatal transport loss.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// Drains every queued message without waiting.
    pub fn drain(&mut self) -> Vec<Envelope> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
