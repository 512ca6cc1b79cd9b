//! # cnp-bus
//!
//! Publish/subscribe message channel used by contract-net agents.
//!
//! - [`Transport`]: the publish/subscribe seam the agents are written against
//! - [`MemoryBroker`]: in-process fan-out broker (tests, single-process fleets)
//! - [`BrokerServer`] / [`TcpTransport`]: the same broker exposed over TCP
//!   with newline-delimited JSON [`Frame`]s, one process per agent
//! - [`TopicFilter`]: MQTT-style `+` / `#` subscription filters
//!
//! Delivery is fan-out to every live subscriber whose filter matches, ordered
//! per subscriber, with no ordering guarantee across subscribers.
//!
//! ## Example
//!
//! ```rust
//! use cnp_bus::{MemoryBroker, Transport};
//!
//! # tokio_test::block_on(async {
//! let broker = MemoryBroker::new();
//! let (coordinator, _coordinator_inbox) = broker.connect("coordinator");
//! let (worker, mut worker_inbox) = broker.connect("M1");
//!
//! worker.subscribe("/cfp").await.unwrap();
//! coordinator.publish("/cfp", br#"{"cfp_id":1,"job_type":"welding"}"#.to_vec()).await.unwrap();
//!
//! let envelope = worker_inbox.recv().await.unwrap();
//! assert_eq!(envelope.topic, "/cfp");
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod error;
pub mod filter;
pub mod frame;
pub mod memory;
pub mod tcp;
pub mod transport;

pub use broker::{BrokerConfig, BrokerServer};
pub use error::{BusError, BusResult};
pub use filter::{validate_topic, TopicFilter};
pub use frame::Frame;
pub use memory::{MemoryBroker, MemoryTransport};
pub use tcp::TcpTransport;
pub use transport::{BusFuture, Envelope, Inbox, Transport};
