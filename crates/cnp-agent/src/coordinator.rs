//! Coordinator agent: drives the job queue through negotiation rounds.
//!
//! Rounds are strictly sequential. For each job the coordinator issues a
//! call-for-proposal, sleeps through the bid deadline while a separate
//! receipt task records bids, then closes the round and notifies every
//! proposer: one [`Award`] to the winner and a [`RejectNotice`] to each
//! loser.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cnp_bus::{Inbox, Transport};
use cnp_proto::{
    decode, Award, Bid, CallForProposal, CfpId, JobCompletion, JobType, RejectNotice, Topic,
    Topics, WorkerId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::negotiation::{NegotiationError, NegotiationRound, RoundOutcome, RoundReport};
use crate::publish::publish;

/// Default bid collection deadline.
pub const DEFAULT_BID_DEADLINE: Duration = Duration::from_secs(3);
/// Default pause between two rounds.
pub const DEFAULT_ROUND_GAP: Duration = Duration::from_secs(1);
/// Default wait before the first round.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(1);
/// Default wait for completions after the last round.
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_secs(10);

/// Coordinator timing and topic configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Topic layout.
    pub topics: Topics,
    /// How long bids are collected after a call-for-proposal.
    pub bid_deadline: Duration,
    /// Pause between the end of one round and the next call-for-proposal.
    pub round_gap: Duration,
    /// Pause before the first round, letting workers subscribe.
    pub startup_delay: Duration,
    /// Pause after the last round, letting job completions arrive.
    pub completion_grace: Duration,
}

impl CoordinatorConfig {
    /// Creates a configuration with the default timings on root topics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            topics: Topics::root(),
            bid_deadline: DEFAULT_BID_DEADLINE,
            round_gap: DEFAULT_ROUND_GAP,
            startup_delay: DEFAULT_STARTUP_DELAY,
            completion_grace: DEFAULT_COMPLETION_GRACE,
        }
    }

    /// Sets the topic layout.
    #[must_use]
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the bid deadline.
    #[must_use]
    pub const fn with_bid_deadline(mut self, deadline: Duration) -> Self {
        self.bid_deadline = deadline;
        self
    }

    /// Sets the pause between rounds.
    #[must_use]
    pub const fn with_round_gap(mut self, gap: Duration) -> Self {
        self.round_gap = gap;
        self
    }

    /// Sets the pause before the first round.
    #[must_use]
    pub const fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Sets the pause after the last round.
    #[must_use]
    pub const fn with_completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A job completion observed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The completion message.
    pub completion: JobCompletion,
    /// When the coordinator received it.
    pub received_at: DateTime<Utc>,
}

/// Result of a coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// One report per negotiated job, in queue order.
    pub rounds: Vec<RoundReport>,
    /// Completions observed during the run.
    pub completions: Vec<CompletionRecord>,
}

impl RunReport {
    /// Number of rounds that produced an award.
    #[must_use]
    pub fn assigned(&self) -> usize {
        self.rounds.iter().filter(|r| r.outcome.is_assigned()).count()
    }

    /// Number of rounds without any proposal.
    #[must_use]
    pub fn unassigned(&self) -> usize {
        self.rounds.len() - self.assigned()
    }

    /// Rounds won by `worker`.
    pub fn awards_to<'a>(&'a self, worker: &'a WorkerId) -> impl Iterator<Item = &'a RoundReport> {
        self.rounds
            .iter()
            .filter(move |r| r.outcome.winner() == Some(worker))
    }
}

/// State owned by the coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorState {
    last_cfp: CfpId,
    current: Option<NegotiationRound>,
    rounds: Vec<RoundReport>,
    completions: Vec<CompletionRecord>,
}

impl CoordinatorState {
    /// Creates an empty state; the first round gets cfp id 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next cfp id and opens a round for `job_type`,
    /// discarding any previous round.
    pub fn begin_round(&mut self, job_type: JobType) -> CallForProposal {
        self.last_cfp = self.last_cfp.next();
        let cfp = CallForProposal::new(self.last_cfp, job_type);
        self.current = Some(NegotiationRound::new(cfp.clone()));
        cfp
    }

    /// Round currently open or most recently closed.
    #[must_use]
    pub const fn current(&self) -> Option<&NegotiationRound> {
        self.current.as_ref()
    }

    /// Records a bid for the current round.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::NoActiveRound`] before the first round,
    /// otherwise whatever [`NegotiationRound::add_bid`] refuses.
    pub fn record_bid(&mut self, bid: Bid) -> Result<(), NegotiationError> {
        self.current
            .as_mut()
            .ok_or(NegotiationError::NoActiveRound)?
            .add_bid(bid)
    }

    /// Closes the current round and keeps its report.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::NoActiveRound`] or
    /// [`NegotiationError::AlreadyClosed`].
    pub fn close_round(&mut self) -> Result<RoundReport, NegotiationError> {
        let report = self
            .current
            .as_mut()
            .ok_or(NegotiationError::NoActiveRound)?
            .close()?;
        self.rounds.push(report.clone());
        Ok(report)
    }

    /// Records a job completion.
    pub fn record_completion(&mut self, completion: JobCompletion) {
        self.completions.push(CompletionRecord {
            completion,
            received_at: Utc::now(),
        });
    }

    /// Everything observed so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport {
            rounds: self.rounds.clone(),
            completions: self.completions.clone(),
        }
    }
}

/// The coordinator agent.
#[derive(Debug, Clone)]
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    state: Arc<Mutex<CoordinatorState>>,
}

impl Coordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(CoordinatorState::new())),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Everything observed so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        self.state.lock().report()
    }

    /// Subscribes to the bids and job completion topics.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] if a subscription fails.
    pub async fn subscribe(&self) -> Result<(), AgentError> {
        let topics = &self.config.topics;
        self.transport.subscribe(&topics.bids()).await?;
        self.transport.subscribe(&topics.job_complete()).await?;
        Ok(())
    }

    /// Negotiates every job in `jobs`, in order.
    ///
    /// Returns the run report once the completion grace period after the
    /// last round has passed, or the partial report when `shutdown` is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Disconnected`] if the inbox closes and
    /// [`AgentError::Transport`] if a subscribe or publish fails.
    pub async fn run(
        &self,
        inbox: Inbox,
        jobs: Vec<JobType>,
        shutdown: CancellationToken,
    ) -> Result<RunReport, AgentError> {
        self.subscribe().await?;
        info!(jobs = jobs.len(), "coordinator online");

        let mut receipt = tokio::spawn(receive(
            Arc::clone(&self.state),
            self.config.topics.clone(),
            inbox,
        ));

        let result = tokio::select! {
            driven = self.drive(jobs) => driven,
            joined = &mut receipt => match joined {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) | Err(_) => Err(AgentError::Disconnected),
            },
            () = shutdown.cancelled() => {
                info!("coordinator shutting down");
                Ok(())
            }
        };
        receipt.abort();

        result?;
        let report = self.report();
        info!(
            rounds = report.rounds.len(),
            assigned = report.assigned(),
            unassigned = report.unassigned(),
            completions = report.completions.len(),
            "run finished"
        );
        Ok(report)
    }

    async fn drive(&self, jobs: Vec<JobType>) -> Result<(), AgentError> {
        tokio::time::sleep(self.config.startup_delay).await;

        let total = jobs.len();
        for (index, job_type) in jobs.into_iter().enumerate() {
            self.negotiate(job_type).await?;
            if index + 1 < total {
                tokio::time::sleep(self.config.round_gap).await;
            }
        }

        debug!(grace = ?self.config.completion_grace, "waiting for job completions");
        tokio::time::sleep(self.config.completion_grace).await;
        Ok(())
    }

    /// Runs one negotiation round for `job_type`.
    ///
    /// Bids are only recorded while the receipt task started by
    /// [`Coordinator::run`] is running.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] if a publish fails.
    pub async fn negotiate(&self, job_type: JobType) -> Result<RoundReport, AgentError> {
        let topics = &self.config.topics;
        let cfp = self.state.lock().begin_round(job_type);
        info!(cfp_id = %cfp.cfp_id, job_type = %cfp.job_type, "issuing call for proposal");
        publish(self.transport.as_ref(), &topics.cfp(), &cfp).await?;

        tokio::time::sleep(self.config.bid_deadline).await;
        let report = self.state.lock().close_round()?;

        match &report.outcome {
            RoundOutcome::Assigned {
                winner,
                cost,
                losers,
            } => {
                info!(
                    cfp_id = %cfp.cfp_id,
                    job_type = %cfp.job_type,
                    winner = %winner,
                    cost,
                    proposals = report.proposals,
                    "awarding job"
                );
                let award = Award::new(cfp.cfp_id, cfp.job_type.clone());
                publish(self.transport.as_ref(), &topics.assign(winner), &award).await?;

                let notice = RejectNotice { cfp_id: cfp.cfp_id };
                for loser in losers {
                    debug!(cfp_id = %cfp.cfp_id, worker = %loser, "rejecting proposal");
                    publish(self.transport.as_ref(), &topics.reject(loser), &notice).await?;
                }
            }
            RoundOutcome::Unassigned => warn!(
                cfp_id = %cfp.cfp_id,
                job_type = %cfp.job_type,
                rejections = report.rejections,
                "no proposals, job unassigned"
            ),
        }

        Ok(report)
    }
}

/// Records bids and completions until the inbox closes.
async fn receive(
    state: Arc<Mutex<CoordinatorState>>,
    topics: Topics,
    mut inbox: Inbox,
) -> Result<(), AgentError> {
    while let Some(envelope) = inbox.recv().await {
        match topics.parse(&envelope.topic) {
            Ok(Topic::Bids) => match decode::<Bid>(&envelope.payload) {
                Ok(bid) => {
                    let worker = bid.worker_id.clone();
                    let cfp_id = bid.cfp_id;
                    let status = bid.outcome.status();
                    match state.lock().record_bid(bid) {
                        Ok(()) => debug!(cfp_id = %cfp_id, worker = %worker, status = ?status, "bid recorded"),
                        Err(e) => debug!(worker = %worker, error = %e, "dropping bid"),
                    }
                }
                Err(e) => debug!(error = %e, "dropping malformed bid"),
            },
            Ok(Topic::JobComplete) => match decode::<JobCompletion>(&envelope.payload) {
                Ok(completion) => {
                    info!(
                        worker = %completion.worker_id,
                        job_type = %completion.job_type,
                        "job completed"
                    );
                    state.lock().record_completion(completion);
                }
                Err(e) => debug!(error = %e, "dropping malformed job completion"),
            },
            Ok(other) => debug!(topic = ?other, "ignoring message"),
            Err(e) => debug!(error = %e, "dropping message on unknown topic"),
        }
    }

    warn!("broker connection lost");
    Err(AgentError::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnp_bus::{Envelope, MemoryBroker, MemoryTransport};
    use cnp_proto::encode;

    fn worker(id: &str) -> WorkerId {
        WorkerId::new(id).unwrap()
    }

    fn job(name: &str) -> JobType {
        JobType::new(name).unwrap()
    }

    // ==========================================================================
    // CoordinatorState
    // ==========================================================================

    #[test]
    fn cfp_ids_start_at_one_and_increase() {
        let mut state = CoordinatorState::new();
        assert_eq!(state.begin_round(job("welding")).cfp_id, CfpId::new(1));
        assert_eq!(state.begin_round(job("painting")).cfp_id, CfpId::new(2));
        assert_eq!(state.begin_round(job("testing")).cfp_id, CfpId::new(3));
    }

    #[test]
    fn bids_before_first_round_are_refused() {
        let mut state = CoordinatorState::new();
        let err = state
            .record_bid(Bid::propose(CfpId::new(1), worker("M1"), 1.0))
            .unwrap_err();
        assert_eq!(err, NegotiationError::NoActiveRound);
    }

    #[test]
    fn new_round_resets_collected_bids() {
        let mut state = CoordinatorState::new();
        state.begin_round(job("welding"));
        state
            .record_bid(Bid::propose(CfpId::new(1), worker("M1"), 8.0))
            .unwrap();
        state.close_round().unwrap();

        state.begin_round(job("welding"));
        assert!(state.current().unwrap().bids().is_empty());
        assert!(state
            .record_bid(Bid::propose(CfpId::new(1), worker("M3"), 7.0))
            .is_err());

        let report = state.close_round().unwrap();
        assert_eq!(report.outcome, RoundOutcome::Unassigned);
        assert_eq!(state.report().rounds.len(), 2);
    }

    #[test]
    fn completions_are_recorded_anytime() {
        let mut state = CoordinatorState::new();
        state.record_completion(JobCompletion {
            worker_id: worker("M2"),
            job_type: job("painting"),
        });
        assert_eq!(state.report().completions.len(), 1);
    }

    #[test]
    fn config_builders() {
        let config = CoordinatorConfig::new()
            .with_bid_deadline(Duration::from_millis(500))
            .with_round_gap(Duration::ZERO)
            .with_startup_delay(Duration::ZERO)
            .with_completion_grace(Duration::from_secs(2));
        assert_eq!(config.bid_deadline, Duration::from_millis(500));
        assert_eq!(config.round_gap, Duration::ZERO);
        assert_eq!(config.completion_grace, Duration::from_secs(2));
        assert_eq!(CoordinatorConfig::default().bid_deadline, DEFAULT_BID_DEADLINE);
    }

    // ==========================================================================
    // Coordinator over a MemoryBroker, bids injected by a probe
    // ==========================================================================

    async fn probe(broker: &MemoryBroker) -> (MemoryTransport, Inbox) {
        let (probe, inbox) = broker.connect("probe");
        for filter in ["/cfp", "/assign/+", "/reject/+"] {
            probe.subscribe(filter).await.unwrap();
        }
        (probe, inbox)
    }

    async fn next(inbox: &mut Inbox) -> Envelope {
        tokio::time::timeout(Duration::from_secs(60), inbox.recv())
            .await
            .expect("timed out")
            .expect("probe inbox closed")
    }

    async fn bid(probe: &MemoryTransport, bid: &Bid) {
        probe.publish("/bids", encode(bid).unwrap()).await.unwrap();
    }

    fn spawn_coordinator(
        broker: &MemoryBroker,
        jobs: Vec<JobType>,
    ) -> tokio::task::JoinHandle<Result<RunReport, AgentError>> {
        let (transport, inbox) = broker.connect("coordinator");
        let coordinator = Coordinator::new(Arc::new(transport), CoordinatorConfig::new());
        tokio::spawn(async move {
            coordinator
                .run(inbox, jobs, CancellationToken::new())
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn cheapest_proposal_wins_and_losers_are_notified() {
        let broker = MemoryBroker::new();
        let (probe, mut inbox) = probe(&broker).await;
        let run = spawn_coordinator(&broker, vec![job("welding")]);

        let cfp: CallForProposal = decode(&next(&mut inbox).await.payload).unwrap();
        assert_eq!(cfp.cfp_id, CfpId::new(1));
        assert_eq!(cfp.job_type, job("welding"));

        bid(&probe, &Bid::propose(cfp.cfp_id, worker("W1"), 8.0)).await;
        bid(&probe, &Bid::propose(cfp.cfp_id, worker("W2"), 5.0)).await;
        bid(&probe, &Bid::reject(cfp.cfp_id, worker("W3"))).await;
        // Redelivery of W1's bid must not produce a second reject notice.
        bid(&probe, &Bid::propose(cfp.cfp_id, worker("W1"), 8.0)).await;

        let award = next(&mut inbox).await;
        assert_eq!(award.topic, "/assign/W2");
        let award: Award = decode(&award.payload).unwrap();
        assert_eq!(award, Award::new(CfpId::new(1), job("welding")));

        let reject = next(&mut inbox).await;
        assert_eq!(reject.topic, "/reject/W1");
        let notice: RejectNotice = decode(&reject.payload).unwrap();
        assert_eq!(notice.cfp_id, CfpId::new(1));

        // Late bid after the deadline changes nothing.
        bid(&probe, &Bid::propose(cfp.cfp_id, worker("W4"), 1.0)).await;

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.rounds[0].proposals, 2);
        assert_eq!(report.rounds[0].rejections, 1);
        assert_eq!(report.rounds[0].outcome.winner(), Some(&worker("W2")));
        assert!(inbox.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_without_proposals_is_unassigned() {
        let broker = MemoryBroker::new();
        let (probe, mut inbox) = probe(&broker).await;
        let run = spawn_coordinator(&broker, vec![job("testing")]);

        let cfp: CallForProposal = decode(&next(&mut inbox).await.payload).unwrap();
        bid(&probe, &Bid::reject(cfp.cfp_id, worker("W3"))).await;

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.unassigned(), 1);
        assert!(inbox.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rounds_run_in_queue_order() {
        let broker = MemoryBroker::new();
        let (_probe, mut inbox) = probe(&broker).await;
        let run = spawn_coordinator(&broker, vec![job("assembly"), job("welding")]);

        let first: CallForProposal = decode(&next(&mut inbox).await.payload).unwrap();
        let second: CallForProposal = decode(&next(&mut inbox).await.payload).unwrap();
        assert_eq!((first.cfp_id, first.job_type), (CfpId::new(1), job("assembly")));
        assert_eq!((second.cfp_id, second.job_type), (CfpId::new(2), job("welding")));

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.rounds.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completions_are_collected_during_grace() {
        let broker = MemoryBroker::new();
        let (probe, _inbox) = probe(&broker).await;
        let run = spawn_coordinator(&broker, Vec::new());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let completion = JobCompletion {
            worker_id: worker("M4"),
            job_type: job("packaging"),
        };
        probe
            .publish("/job_complete", encode(&completion).unwrap())
            .await
            .unwrap();

        let report = run.await.unwrap().unwrap();
        assert!(report.rounds.is_empty());
        assert_eq!(report.completions.len(), 1);
        assert_eq!(report.completions[0].completion, completion);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_loss_is_fatal() {
        let broker = MemoryBroker::new();
        let run = spawn_coordinator(&broker, vec![job("welding")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        broker.disconnect("coordinator");

        let result = run.await.unwrap();
        assert!(matches!(result, Err(AgentError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_partial_report() {
        let broker = MemoryBroker::new();
        let (transport, inbox) = broker.connect("coordinator");
        let coordinator = Coordinator::new(Arc::new(transport), CoordinatorConfig::new());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let run = tokio::spawn(async move {
            coordinator
                .run(inbox, vec![job("welding"), job("welding")], token)
                .await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.rounds.len(), 1);
    }
}
