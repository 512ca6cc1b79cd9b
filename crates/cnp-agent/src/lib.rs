//! # cnp-agent
//!
//! The two roles of a contract-net fleet.
//!
//! This crate provides:
//!
//! - **Worker agent**: [`Worker`] answers calls-for-proposal from its
//!   [`CapabilityTable`], stays silent while busy, and executes awarded jobs
//! - **Coordinator**: [`Coordinator`] runs one [`NegotiationRound`] per job
//!   and awards each job to the cheapest proposal
//! - **Winner selection**: [`select_winner`] (minimum cost, ties to the
//!   earliest proposal)
//!
//! Both agents run against any [`cnp_bus::Transport`].
//!
//! ## Example
//!
//! ```rust
//! use cnp_agent::negotiation::{select_winner, Proposal};
//! use cnp_proto::WorkerId;
//!
//! let proposals = vec![
//!     Proposal { worker_id: WorkerId::new("W1").unwrap(), cost: 8.0 },
//!     Proposal { worker_id: WorkerId::new("W2").unwrap(), cost: 5.0 },
//! ];
//!
//! let winner = select_winner(&proposals).unwrap();
//! assert_eq!(winner.worker_id.as_str(), "W2");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capability;
pub mod coordinator;
pub mod error;
pub mod negotiation;
mod publish;
pub mod worker;

pub use capability::{CapabilityTable, MAX_JOB_DURATION};
pub use coordinator::{CompletionRecord, Coordinator, CoordinatorConfig, CoordinatorState, RunReport};
pub use error::AgentError;
pub use negotiation::{
    select_winner, NegotiationError, NegotiationPhase, NegotiationRound, Proposal, RoundOutcome,
    RoundReport,
};
pub use worker::{AwardRefusal, Worker, WorkerHandle, WorkerPhase, WorkerState};
