//! Negotiation round bookkeeping and winner selection.
//!
//! A [`NegotiationRound`] collects the bids for one call-for-proposal until
//! it is closed, then [`decide`]s the outcome: the cheapest proposal wins,
//! ties go to the proposal received first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use cnp_proto::{Bid, BidOutcome, CallForProposal, CfpId, WorkerId};
use serde::{Deserialize, Serialize};

/// A proposal extracted from a bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Proposing worker.
    pub worker_id: WorkerId,
    /// Self-declared execution time in seconds.
    pub cost: f64,
}

/// Selects the cheapest proposal.
///
/// Among equal costs the earliest proposal in `proposals` wins. Returns
/// `None` if there are no proposals.
#[must_use]
pub fn select_winner(proposals: &[Proposal]) -> Option<&Proposal> {
    // min_by keeps the first of several equal minima.
    proposals.iter().min_by(|a, b| a.cost.total_cmp(&b.cost))
}

/// Outcome of a closed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// The job was awarded.
    Assigned {
        /// Worker receiving the award.
        winner: WorkerId,
        /// Winning cost.
        cost: f64,
        /// Proposers that lost, in the order their bids were received.
        losers: Vec<WorkerId>,
    },
    /// Nobody proposed; the job is dropped.
    Unassigned,
}

impl RoundOutcome {
    /// Returns true if the job was awarded.
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }

    /// Returns the winner, if any.
    #[must_use]
    pub const fn winner(&self) -> Option<&WorkerId> {
        match self {
            Self::Assigned { winner, .. } => Some(winner),
            Self::Unassigned => None,
        }
    }
}

/// Summary of one negotiation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Call-for-proposal of the round.
    pub cfp: CallForProposal,
    /// Number of proposals received.
    pub proposals: usize,
    /// Number of explicit rejections received.
    pub rejections: usize,
    /// Award decision.
    pub outcome: RoundOutcome,
    /// When the call-for-proposal was issued.
    pub started_at: DateTime<Utc>,
    /// When bid collection closed.
    pub decided_at: DateTime<Utc>,
}

/// Decides the outcome of a set of bids received in order.
#[must_use]
pub fn decide(bids: &[Bid]) -> (RoundOutcome, usize, usize) {
    let proposals: Vec<Proposal> = bids
        .iter()
        .filter_map(|bid| match bid.outcome {
            BidOutcome::Propose { cost } => Some(Proposal {
                worker_id: bid.worker_id.clone(),
                cost,
            }),
            BidOutcome::Reject => None,
        })
        .collect();
    let rejections = bids.len() - proposals.len();

    let outcome = match select_winner(&proposals) {
        Some(best) => RoundOutcome::Assigned {
            winner: best.worker_id.clone(),
            cost: best.cost,
            losers: proposals
                .iter()
                .filter(|p| p.worker_id != best.worker_id)
                .map(|p| p.worker_id.clone())
                .collect(),
        },
        None => RoundOutcome::Unassigned,
    };

    (outcome, proposals.len(), rejections)
}

/// Phase of a negotiation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPhase {
    /// Bids are being collected.
    CollectingBids,
    /// The deadline passed; further bids are stale.
    Closed,
}

/// Bids collected for one call-for-proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationRound {
    cfp: CallForProposal,
    bids: Vec<Bid>,
    bidders: HashSet<WorkerId>,
    phase: NegotiationPhase,
    started_at: DateTime<Utc>,
}

impl NegotiationRound {
    /// Opens a round for `cfp`.
    #[must_use]
    pub fn new(cfp: CallForProposal) -> Self {
        Self {
            cfp,
            bids: Vec::new(),
            bidders: HashSet::new(),
            phase: NegotiationPhase::CollectingBids,
            started_at: Utc::now(),
        }
    }

    /// Call-for-proposal of this round.
    #[must_use]
    pub const fn cfp(&self) -> &CallForProposal {
        &self.cfp
    }

    /// Bids in the order they were accepted.
    #[must_use]
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Returns true while bids are accepted.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.phase == NegotiationPhase::CollectingBids
    }

    /// Records a bid.
    ///
    /// # Errors
    ///
    /// - [`NegotiationError::StaleBid`] if the bid answers another CFP
    /// - [`NegotiationError::NotCollectingBids`] once the round is closed
    /// - [`NegotiationError::DuplicateBid`] if the worker already bid
    pub fn add_bid(&mut self, bid: Bid) -> Result<(), NegotiationError> {
        if bid.cfp_id != self.cfp.cfp_id {
            return Err(NegotiationError::StaleBid {
                current: self.cfp.cfp_id,
                received: bid.cfp_id,
            });
        }
        if self.phase != NegotiationPhase::CollectingBids {
            return Err(NegotiationError::NotCollectingBids);
        }
        if !self.bidders.insert(bid.worker_id.clone()) {
            return Err(NegotiationError::DuplicateBid(bid.worker_id));
        }
        self.bids.push(bid);
        Ok(())
    }

    /// Closes bid collection and decides the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::AlreadyClosed`] if called twice.
    pub fn close(&mut self) -> Result<RoundReport, NegotiationError> {
        if self.phase != NegotiationPhase::CollectingBids {
            return Err(NegotiationError::AlreadyClosed);
        }
        self.phase = NegotiationPhase::Closed;

        let (outcome, proposals, rejections) = decide(&self.bids);
        Ok(RoundReport {
            cfp: self.cfp.clone(),
            proposals,
            rejections,
            outcome,
            started_at: self.started_at,
            decided_at: Utc::now(),
        })
    }
}

/// Errors during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// No round has been opened yet.
    #[error("no negotiation round is active")]
    NoActiveRound,
    /// The bid belongs to a different round.
    #[error("stale bid for cfp {received} (current cfp {current})")]
    StaleBid {
        /// Round currently open.
        current: CfpId,
        /// Round the bid answered.
        received: CfpId,
    },
    /// Bid arrived after the deadline.
    #[error("negotiation is not in collecting bids phase")]
    NotCollectingBids,
    /// The worker already bid in this round.
    #[error("duplicate bid from worker {0}")]
    DuplicateBid(WorkerId),
    /// The round was already closed.
    #[error("negotiation already closed")]
    AlreadyClosed,
}
