//! Runs a whole fleet inside one process on an in-process broker.

use std::sync::Arc;

use cnp_agent::{Coordinator, RunReport, Worker};
use cnp_bus::MemoryBroker;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::error::NodeError;

/// Client id the coordinator connects with.
pub const COORDINATOR_CLIENT_ID: &str = "coordinator";

/// Runs every configured worker and the coordinator until the job queue
/// has been negotiated, then stops the workers.
///
/// Cancelling `shutdown` stops the coordinator early; its partial report is
/// returned.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, or if the coordinator
/// or any worker fails.
pub async fn run_fleet(
    config: &FleetConfig,
    shutdown: CancellationToken,
) -> Result<RunReport, NodeError> {
    let topics = config.topics()?;
    let broker = MemoryBroker::new();
    let workers_shutdown = shutdown.child_token();
    let mut workers = JoinSet::new();

    for (id, capabilities) in config.worker_specs()? {
        let (transport, inbox) = broker.connect(id.as_str());
        let worker = Worker::new(id, capabilities, Arc::new(transport)).with_topics(topics.clone());
        // Subscribe before the coordinator starts so no CFP can be missed.
        worker.subscribe().await?;
        let token = workers_shutdown.clone();
        workers.spawn(async move { worker.serve(inbox, token).await });
    }
    info!(workers = workers.len(), "fleet started");

    let (transport, inbox) = broker.connect(COORDINATOR_CLIENT_ID);
    let coordinator = Coordinator::new(Arc::new(transport), config.coordinator_config()?);
    let report = coordinator.run(inbox, config.jobs()?, shutdown).await;

    workers_shutdown.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined? {
            warn!(error = %e, "worker stopped with error");
        }
    }

    Ok(report?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnp_proto::WorkerId;

    #[tokio::test(start_paused = true)]
    async fn sample_fleet_negotiates_every_job() {
        let report = run_fleet(&FleetConfig::sample(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.rounds.len(), 7);
        // assembly: M1 (5) beats M2 (6).
        assert_eq!(
            report.rounds[0].outcome.winner(),
            Some(&WorkerId::new("M1").unwrap())
        );
        // welding: M1 is busy with assembly, M3 (7) wins.
        assert_eq!(
            report.rounds[1].outcome.winner(),
            Some(&WorkerId::new("M3").unwrap())
        );
        // painting: M2 (4) beats M4 (5).
        assert_eq!(
            report.rounds[2].outcome.winner(),
            Some(&WorkerId::new("M2").unwrap())
        );
        assert_eq!(report.unassigned(), 0);
        assert_eq!(report.completions.len(), report.assigned());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fleet_returns_partial_report() {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let run = tokio::spawn(async move { run_fleet(&FleetConfig::sample(), token).await });

        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        shutdown.cancel();

        let report = run.await.unwrap().unwrap();
        assert!(report.rounds.len() < 7);
    }
}
