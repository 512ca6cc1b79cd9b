//! Worker agent: answers calls-for-proposal and executes awarded jobs.
//!
//! A worker is either idle or busy. While busy it stays silent on every
//! call-for-proposal, so the coordinator cannot tell it apart from an
//! offline worker. An accepted award makes the worker busy for exactly the
//! duration its own capability table declares for the job type; a spawned
//! timer then publishes the [`JobCompletion`].

use std::sync::Arc;
use std::time::Duration;

use cnp_bus::{Envelope, Inbox, Transport};
use cnp_proto::{
    decode, Award, Bid, CallForProposal, CfpId, JobCompletion, JobType, RejectNotice, Topic,
    Topics, WorkerId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capability::CapabilityTable;
use crate::error::AgentError;
use crate::publish::publish;

/// Availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Answers calls-for-proposal.
    Idle,
    /// Executing a job; silent on calls-for-proposal.
    Busy,
}

/// Reason an award was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AwardRefusal {
    /// The worker is still executing a previous job.
    #[error("worker is busy")]
    Busy,
    /// The job type is not in the capability table.
    #[error("job type '{0}' is not in the capability table")]
    NotCapable(JobType),
    /// The award does not answer this worker's latest proposal.
    #[error("award for cfp {received} does not match last proposal {expected:?}")]
    Stale {
        /// Last CFP this worker proposed on.
        expected: Option<CfpId>,
        /// CFP the award refers to.
        received: CfpId,
    },
    /// The declared duration puts the finish time past what the clock can
    /// represent.
    #[error("duration {0:?} cannot be scheduled")]
    Unschedulable(Duration),
}

/// State owned by one worker.
#[derive(Debug, Clone)]
pub struct WorkerState {
    capabilities: CapabilityTable,
    busy_until: Option<Instant>,
    last_proposal: Option<CfpId>,
    jobs_accepted: u64,
}

impl WorkerState {
    /// Creates an idle worker state.
    #[must_use]
    pub const fn new(capabilities: CapabilityTable) -> Self {
        Self {
            capabilities,
            busy_until: None,
            last_proposal: None,
            jobs_accepted: 0,
        }
    }

    /// Capability table of the worker.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Phase at instant `now`.
    #[must_use]
    pub fn phase(&self, now: Instant) -> WorkerPhase {
        match self.busy_until {
            Some(until) if now < until => WorkerPhase::Busy,
            _ => WorkerPhase::Idle,
        }
    }

    /// Instant the current job finishes, if one was ever accepted.
    #[must_use]
    pub const fn busy_until(&self) -> Option<Instant> {
        self.busy_until
    }

    /// Last CFP this worker proposed on and has not lost yet.
    #[must_use]
    pub const fn last_proposal(&self) -> Option<CfpId> {
        self.last_proposal
    }

    /// Number of awards accepted so far.
    #[must_use]
    pub const fn jobs_accepted(&self) -> u64 {
        self.jobs_accepted
    }

    /// Decides how to answer `cfp`.
    ///
    /// Returns `None` while busy (no bid at all), a proposal priced at the
    /// declared duration if capable, and a rejection otherwise.
    pub fn answer_cfp(
        &mut self,
        worker_id: &WorkerId,
        cfp: &CallForProposal,
        now: Instant,
    ) -> Option<Bid> {
        if self.phase(now) == WorkerPhase::Busy {
            return None;
        }
        match self.capabilities.duration(&cfp.job_type) {
            Some(duration) => {
                self.last_proposal = Some(cfp.cfp_id);
                Some(Bid::propose(
                    cfp.cfp_id,
                    worker_id.clone(),
                    duration.as_secs_f64(),
                ))
            }
            None => Some(Bid::reject(cfp.cfp_id, worker_id.clone())),
        }
    }

    /// Accepts an award, returning the execution duration.
    ///
    /// The duration always comes from the capability table.
    ///
    /// # Errors
    ///
    /// Returns an [`AwardRefusal`] and leaves the state untouched. A job
    /// type outside the capability table is reported as
    /// [`AwardRefusal::NotCapable`] even while busy.
    pub fn accept_award(&mut self, award: &Award, now: Instant) -> Result<Duration, AwardRefusal> {
        let duration = self
            .capabilities
            .duration(&award.job_type)
            .ok_or_else(|| AwardRefusal::NotCapable(award.job_type.clone()))?;
        if self.phase(now) == WorkerPhase::Busy {
            return Err(AwardRefusal::Busy);
        }
        if self.last_proposal != Some(award.cfp_id) {
            return Err(AwardRefusal::Stale {
                expected: self.last_proposal,
                received: award.cfp_id,
            });
        }

        let until = now
            .checked_add(duration)
            .ok_or(AwardRefusal::Unschedulable(duration))?;
        self.busy_until = Some(until);
        self.last_proposal = None;
        self.jobs_accepted += 1;
        Ok(duration)
    }

    /// Records a lost round. Returns true if it matched the last proposal.
    pub fn on_reject(&mut self, notice: &RejectNotice) -> bool {
        if self.last_proposal == Some(notice.cfp_id) {
            self.last_proposal = None;
            true
        } else {
            false
        }
    }
}

/// Read-only view of a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    state: Arc<Mutex<WorkerState>>,
}

impl WorkerHandle {
    /// Worker id.
    #[must_use]
    pub const fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> WorkerPhase {
        self.state.lock().phase(Instant::now())
    }

    /// Returns true while a job is executing.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.phase() == WorkerPhase::Busy
    }

    /// Instant the current job finishes.
    #[must_use]
    pub fn busy_until(&self) -> Option<Instant> {
        self.state.lock().busy_until()
    }

    /// Number of awards accepted so far.
    #[must_use]
    pub fn jobs_accepted(&self) -> u64 {
        self.state.lock().jobs_accepted()
    }

    /// Copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> WorkerState {
        self.state.lock().clone()
    }
}

/// A worker agent bound to a transport.
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    topics: Topics,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<WorkerState>>,
}

impl Worker {
    /// Creates a worker using root topics.
    #[must_use]
    pub fn new(id: WorkerId, capabilities: CapabilityTable, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            topics: Topics::root(),
            transport,
            state: Arc::new(Mutex::new(WorkerState::new(capabilities))),
        }
    }

    /// Uses a namespaced topic layout.
    #[must_use]
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Worker id.
    #[must_use]
    pub const fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Returns a handle for observing this worker's state.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Subscribes to the CFP topic and this worker's award and reject topics.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] if a subscription fails.
    pub async fn subscribe(&self) -> Result<(), AgentError> {
        self.transport.subscribe(&self.topics.cfp()).await?;
        self.transport
            .subscribe(&self.topics.assign(&self.id))
            .await?;
        self.transport
            .subscribe(&self.topics.reject(&self.id))
            .await?;
        Ok(())
    }

    /// Subscribes, then serves messages until shutdown or transport loss.
    ///
    /// # Errors
    ///
    /// See [`Worker::serve`].
    pub async fn run(&self, inbox: Inbox, shutdown: CancellationToken) -> Result<(), AgentError> {
        self.subscribe().await?;
        let jobs: Vec<String> = self
            .state
            .lock()
            .capabilities()
            .iter()
            .map(|(job, d)| format!("{job}={}", d.as_secs_f64()))
            .collect();
        info!(worker = %self.id, capabilities = %jobs.join(","), "worker online");
        self.serve(inbox, shutdown).await
    }

    /// Handles messages from `inbox` in arrival order.
    ///
    /// Returns `Ok(())` when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Disconnected`] when the inbox closes and
    /// [`AgentError::Transport`] when a publish fails.
    pub async fn serve(
        &self,
        mut inbox: Inbox,
        shutdown: CancellationToken,
    ) -> Result<(), AgentError> {
        loop {
            let envelope = tokio::select! {
                envelope = inbox.recv() => envelope,
                () = shutdown.cancelled() => {
                    info!(worker = %self.id, "worker shutting down");
                    return Ok(());
                }
            };
            let Some(envelope) = envelope else {
                warn!(worker = %self.id, "broker connection lost");
                return Err(AgentError::Disconnected);
            };
            self.handle_envelope(envelope).await?;
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) -> Result<(), AgentError> {
        let topic = match self.topics.parse(&envelope.topic) {
            Ok(topic) => topic,
            Err(e) => {
                debug!(worker = %self.id, error = %e, "dropping message on unknown topic");
                return Ok(());
            }
        };

        match topic {
            Topic::Cfp => match decode::<CallForProposal>(&envelope.payload) {
                Ok(cfp) => self.on_cfp(&cfp).await,
                Err(e) => {
                    debug!(worker = %self.id, error = %e, "dropping malformed cfp");
                    Ok(())
                }
            },
            Topic::Assign(target) if target == self.id => {
                match decode::<Award>(&envelope.payload) {
                    Ok(award) => {
                        self.on_award(award);
                        Ok(())
                    }
                    Err(e) => {
                        debug!(worker = %self.id, error = %e, "dropping malformed award");
                        Ok(())
                    }
                }
            }
            Topic::Reject(target) if target == self.id => {
                match decode::<RejectNotice>(&envelope.payload) {
                    Ok(notice) => {
                        let matched = self.state.lock().on_reject(&notice);
                        info!(worker = %self.id, cfp_id = %notice.cfp_id, matched, "proposal rejected");
                    }
                    Err(e) => debug!(worker = %self.id, error = %e, "dropping malformed reject"),
                }
                Ok(())
            }
            other => {
                debug!(worker = %self.id, topic = ?other, "ignoring message");
                Ok(())
            }
        }
    }

    async fn on_cfp(&self, cfp: &CallForProposal) -> Result<(), AgentError> {
        let bid = self
            .state
            .lock()
            .answer_cfp(&self.id, cfp, Instant::now());

        let Some(bid) = bid else {
            debug!(worker = %self.id, cfp_id = %cfp.cfp_id, "busy, not bidding");
            return Ok(());
        };

        match bid.outcome.cost() {
            Some(cost) => info!(
                worker = %self.id,
                cfp_id = %cfp.cfp_id,
                job_type = %cfp.job_type,
                cost,
                "proposing"
            ),
            None => info!(
                worker = %self.id,
                cfp_id = %cfp.cfp_id,
                job_type = %cfp.job_type,
                "rejecting, not capable"
            ),
        }
        publish(self.transport.as_ref(), &self.topics.bids(), &bid).await
    }

    fn on_award(&self, award: Award) {
        let accepted = self.state.lock().accept_award(&award, Instant::now());
        let duration = match accepted {
            Ok(duration) => duration,
            Err(AwardRefusal::NotCapable(job_type)) => {
                error!(
                    worker = %self.id,
                    cfp_id = %award.cfp_id,
                    job_type = %job_type,
                    "protocol violation: award for a job type outside the capability table"
                );
                return;
            }
            Err(AwardRefusal::Busy) => {
                warn!(worker = %self.id, cfp_id = %award.cfp_id, "ignoring award while busy");
                return;
            }
            Err(refusal @ AwardRefusal::Stale { .. }) => {
                debug!(worker = %self.id, reason = %refusal, "dropping stale award");
                return;
            }
            Err(refusal @ AwardRefusal::Unschedulable(_)) => {
                error!(worker = %self.id, cfp_id = %award.cfp_id, reason = %refusal, "ignoring award");
                return;
            }
        };

        info!(
            worker = %self.id,
            cfp_id = %award.cfp_id,
            job_type = %award.job_type,
            secs = duration.as_secs_f64(),
            "job accepted"
        );
        self.spawn_execution(award.job_type, duration);
    }

    fn spawn_execution(&self, job_type: JobType, duration: Duration) {
        let transport = Arc::clone(&self.transport);
        let topic = self.topics.job_complete();
        let completion = JobCompletion {
            worker_id: self.id.clone(),
            job_type,
        };

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!(worker = %completion.worker_id, job_type = %completion.job_type, "job complete");
            if let Err(e) = publish(transport.as_ref(), &topic, &completion).await {
                warn!(worker = %completion.worker_id, error = %e, "failed to publish job completion");
            }
        });
    }
}
