//! # cnp-node
//!
//! Operator surface of a contract-net fleet: the fleet configuration file
//! and an in-process fleet runner. The `cnpd` binary wraps both and also
//! runs the TCP broker and single agents as separate processes.
//!
//! ## Example
//!
//! ```rust
//! use cnp_node::FleetConfig;
//!
//! let config = FleetConfig::sample();
//! config.validate().unwrap();
//! assert_eq!(config.workers.len(), 4);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod fleet;

pub use config::FleetConfig;
pub use error::NodeError;
pub use fleet::run_fleet;
