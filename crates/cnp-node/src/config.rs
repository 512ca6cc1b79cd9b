//! Fleet configuration.
//!
//! One TOML file describes a whole fleet:
//! - where the broker listens and the topic namespace
//! - coordinator timings and the job queue
//! - every worker with its capability table

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use cnp_agent::{CapabilityTable, CoordinatorConfig};
use cnp_proto::{JobType, Topics, WorkerId};
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Default broker address (the classic MQTT port).
pub const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";

/// Broker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerSection {
    /// Address the broker listens on and clients connect to.
    pub addr: SocketAddr,
    /// Optional topic namespace shared by every agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 1883)),
            namespace: None,
        }
    }
}

/// Coordinator settings. Timings are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorSection {
    /// Bid collection deadline.
    pub bid_deadline_secs: f64,
    /// Pause between rounds.
    pub round_gap_secs: f64,
    /// Pause before the first round.
    pub startup_delay_secs: f64,
    /// Pause after the last round.
    pub completion_grace_secs: f64,
    /// Job queue, negotiated in order.
    pub jobs: Vec<String>,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            bid_deadline_secs: 3.0,
            round_gap_secs: 1.0,
            startup_delay_secs: 1.0,
            completion_grace_secs: 10.0,
            jobs: Vec::new(),
        }
    }
}

/// One worker of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    /// Worker id.
    pub id: String,
    /// Job type to duration in seconds.
    #[serde(default)]
    pub capabilities: BTreeMap<String, f64>,
}

/// Whole fleet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Broker settings.
    #[serde(default)]
    pub broker: BrokerSection,
    /// Coordinator settings.
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    /// Workers.
    #[serde(default)]
    pub workers: Vec<WorkerSection>,
}

impl FleetConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        let config: Self =
            toml::from_str(content).map_err(|e| NodeError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(format!("cannot render TOML: {e}")))
    }

    /// The four-machine sample fleet with a seven-job queue.
    #[must_use]
    pub fn sample() -> Self {
        let worker = |id: &str, caps: &[(&str, f64)]| WorkerSection {
            id: id.to_string(),
            capabilities: caps.iter().map(|(job, secs)| ((*job).to_string(), *secs)).collect(),
        };

        Self {
            broker: BrokerSection::default(),
            coordinator: CoordinatorSection {
                jobs: [
                    "assembly", "welding", "painting", "testing", "assembly", "welding",
                    "packaging",
                ]
                .iter()
                .map(ToString::to_string)
                .collect(),
                ..CoordinatorSection::default()
            },
            workers: vec![
                worker("M1", &[("assembly", 5.0), ("welding", 8.0)]),
                worker("M2", &[("assembly", 6.0), ("painting", 4.0)]),
                worker("M3", &[("welding", 7.0), ("testing", 3.0)]),
                worker("M4", &[("painting", 5.0), ("testing", 4.0), ("packaging", 2.0)]),
            ],
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.topics()?;
        let timings = self.coordinator_config()?;
        if timings.bid_deadline.is_zero() {
            return Err(NodeError::Config(
                "bid_deadline_secs must be greater than zero".to_string(),
            ));
        }
        self.jobs()?;

        let mut seen = HashSet::new();
        for (id, _) in self.worker_specs()? {
            if !seen.insert(id.clone()) {
                return Err(NodeError::Config(format!("duplicate worker id '{id}'")));
            }
        }
        Ok(())
    }

    /// Topic layout for the configured namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is invalid.
    pub fn topics(&self) -> Result<Topics, NodeError> {
        match &self.broker.namespace {
            Some(ns) => Ok(Topics::with_namespace(ns)?),
            None => Ok(Topics::root()),
        }
    }

    /// Coordinator configuration with validated timings.
    ///
    /// # Errors
    ///
    /// Returns an error if a timing is negative or not finite.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, NodeError> {
        let section = &self.coordinator;
        Ok(CoordinatorConfig::new()
            .with_topics(self.topics()?)
            .with_bid_deadline(secs("bid_deadline_secs", section.bid_deadline_secs)?)
            .with_round_gap(secs("round_gap_secs", section.round_gap_secs)?)
            .with_startup_delay(secs("startup_delay_secs", section.startup_delay_secs)?)
            .with_completion_grace(secs(
                "completion_grace_secs",
                section.completion_grace_secs,
            )?))
    }

    /// Job queue.
    ///
    /// # Errors
    ///
    /// Returns an error if a job type is blank.
    pub fn jobs(&self) -> Result<Vec<JobType>, NodeError> {
        self.coordinator
            .jobs
            .iter()
            .map(|job| JobType::new(job.as_str()).map_err(NodeError::from))
            .collect()
    }

    /// Validated worker ids and capability tables.
    ///
    /// # Errors
    ///
    /// Returns an error if an id or a capability entry is invalid.
    pub fn worker_specs(&self) -> Result<Vec<(WorkerId, CapabilityTable)>, NodeError> {
        self.workers
            .iter()
            .map(|worker| -> Result<_, NodeError> {
                let id = WorkerId::new(worker.id.as_str())?;
                let table = CapabilityTable::from_secs(
                    worker.capabilities.iter().map(|(job, s)| (job.as_str(), *s)),
                )
                .map_err(|e| NodeError::Config(format!("worker '{id}': {e}")))?;
                Ok((id, table))
            })
            .collect()
    }
}

/// Converts a configured number of seconds.
///
/// # Errors
///
/// Returns an error if `value` is negative or not finite.
pub fn secs(field: &str, value: f64) -> Result<Duration, NodeError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        NodeError::Config(format!(
            "{field} must be a finite non-negative number of seconds, got {value}"
        ))
    })
}
