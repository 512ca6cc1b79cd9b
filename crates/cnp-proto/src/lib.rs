//! # cnp-proto
//!
//! Protocol definitions for contract-net negotiation.
//!
//! A coordinator broadcasts a [`CallForProposal`], workers answer with a
//! [`Bid`], and the coordinator closes the round with one [`Award`] and a
//! [`RejectNotice`] per losing proposer. Workers report finished jobs with a
//! [`JobCompletion`]. Every payload is a JSON object; [`encode`] and
//! [`decode`] are the only entry points used by the agents.
//!
//! ## Example
//!
//! ```rust
//! use cnp_proto::{decode, encode, Bid, BidOutcome, CfpId, WorkerId};
//!
//! let worker = WorkerId::new("M2").unwrap();
//! let bid = Bid::propose(CfpId::new(7), worker, 4.0);
//!
//! let bytes = encode(&bid).unwrap();
//! let back: Bid = decode(&bytes).unwrap();
//! assert_eq!(back.outcome, BidOutcome::Propose { cost: 4.0 });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod topics;
pub mod types;

pub use error::ProtoError;
pub use messages::{
    decode, encode, Award, Bid, BidOutcome, BidStatus, CallForProposal, JobCompletion,
    RejectNotice,
};
pub use topics::{Topic, Topics};
pub use types::{CfpId, JobType, WorkerId};
