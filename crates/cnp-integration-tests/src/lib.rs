//! Integration test crate for the contract-net fleet.
//!
//! This crate exists solely to run end-to-end tests that span the protocol,
//! bus, agent and node crates. It has no public API.

#![forbid(unsafe_code)]
