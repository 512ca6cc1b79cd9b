//! Protocol message definitions.
//!
//! Field names follow the wire format (`cfp_id`, `job_type`, `worker_id`,
//! `status`, `bid_time`). `machine_id` is accepted as an alias for
//! `worker_id`. Unknown fields are ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::types::{CfpId, JobType, WorkerId};

/// Encodes a message as a JSON payload.
///
/// # Errors
///
/// Returns [`ProtoError::Encoding`] if serialization fails.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(msg).map_err(|e| ProtoError::Encoding(e.to_string()))
}

/// Decodes a JSON payload into a message.
///
/// # Errors
///
/// Returns [`ProtoError::Decoding`] if the payload is not valid JSON, misses
/// a required field, or fails validation.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtoError> {
    serde_json::from_slice(payload).map_err(|e| ProtoError::Decoding(e.to_string()))
}

/// Broadcast announcement of a job open for bidding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallForProposal {
    /// Correlation id for this round.
    pub cfp_id: CfpId,
    /// Job being offered.
    pub job_type: JobType,
}

impl CallForProposal {
    /// Creates a call-for-proposal.
    #[must_use]
    pub const fn new(cfp_id: CfpId, job_type: JobType) -> Self {
        Self { cfp_id, job_type }
    }
}

/// Wire value of the `status` field of a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    /// The worker offers to do the job.
    Proposal,
    /// The worker cannot do the job.
    Reject,
}

/// Outcome carried by a bid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BidOutcome {
    /// Offer to execute the job in `cost` time units.
    Propose {
        /// Self-declared execution time in seconds.
        cost: f64,
    },
    /// Explicit refusal: the job type is not in the worker's capabilities.
    Reject,
}

impl BidOutcome {
    /// Returns the wire status for this outcome.
    #[must_use]
    pub const fn status(&self) -> BidStatus {
        match self {
            Self::Propose { .. } => BidStatus::Proposal,
            Self::Reject => BidStatus::Reject,
        }
    }

    /// Returns the proposed cost, if any.
    #[must_use]
    pub fn cost(&self) -> Option<f64> {
        match self {
            Self::Propose { cost } => Some(*cost),
            Self::Reject => None,
        }
    }
}

/// A worker's answer to a call-for-proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BidWire", into = "BidWire")]
pub struct Bid {
    /// Call-for-proposal being answered.
    pub cfp_id: CfpId,
    /// Worker that sent the bid.
    pub worker_id: WorkerId,
    /// Proposal or rejection.
    pub outcome: BidOutcome,
}

impl Bid {
    /// Creates a proposal.
    #[must_use]
    pub fn propose(cfp_id: CfpId, worker_id: WorkerId, cost: f64) -> Self {
        Self {
            cfp_id,
            worker_id,
            outcome: BidOutcome::Propose { cost },
        }
    }

    /// Creates a rejection.
    #[must_use]
    pub const fn reject(cfp_id: CfpId, worker_id: WorkerId) -> Self {
        Self {
            cfp_id,
            worker_id,
            outcome: BidOutcome::Reject,
        }
    }

    /// Returns true if this bid is a proposal.
    #[must_use]
    pub const fn is_proposal(&self) -> bool {
        matches!(self.outcome, BidOutcome::Propose { .. })
    }
}

/// Flat wire shape of a [`Bid`]: `bid_time` is present iff `status` is
/// `"proposal"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BidWire {
    cfp_id: CfpId,
    #[serde(alias = "machine_id")]
    worker_id: WorkerId,
    status: BidStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bid_time: Option<f64>,
}

impl TryFrom<BidWire> for Bid {
    type Error = ProtoError;

    fn try_from(wire: BidWire) -> Result<Self, Self::Error> {
        let outcome = match (wire.status, wire.bid_time) {
            (BidStatus::Proposal, Some(cost)) => {
                if !cost.is_finite() || cost < 0.0 {
                    return Err(ProtoError::Validation(format!(
                        "bid_time must be a finite non-negative number, got {cost}"
                    )));
                }
                BidOutcome::Propose { cost }
            }
            (BidStatus::Proposal, None) => return Err(ProtoError::MissingField("bid_time")),
            (BidStatus::Reject, None) => BidOutcome::Reject,
            (BidStatus::Reject, Some(_)) => {
                return Err(ProtoError::Validation(
                    "bid_time is only allowed on proposals".into(),
                ))
            }
        };
        Ok(Self {
            cfp_id: wire.cfp_id,
            worker_id: wire.worker_id,
            outcome,
        })
    }
}

impl From<Bid> for BidWire {
    fn from(bid: Bid) -> Self {
        Self {
            cfp_id: bid.cfp_id,
            worker_id: bid.worker_id,
            status: bid.outcome.status(),
            bid_time: bid.outcome.cost(),
        }
    }
}

/// Binding assignment of a job to the winning worker.
///
/// The winner is addressed by the topic the award is published on
/// (`/assign/{worker_id}`), so the payload only carries the job and round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    /// Job being assigned.
    pub job_type: JobType,
    /// Round that produced the award.
    pub cfp_id: CfpId,
}

impl Award {
    /// Creates an award.
    #[must_use]
    pub const fn new(cfp_id: CfpId, job_type: JobType) -> Self {
        Self { job_type, cfp_id }
    }
}

/// Notice sent to each losing proposer of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectNotice {
    /// Round the proposer lost.
    pub cfp_id: CfpId,
}

/// Published by a worker once an awarded job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    /// Worker that executed the job.
    #[serde(alias = "machine_id")]
    pub worker_id: WorkerId,
    /// Job that finished.
    pub job_type: JobType,
}
