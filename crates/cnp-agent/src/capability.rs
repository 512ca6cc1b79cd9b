//! Worker capability table: which job types a worker can execute and how
//! long each one takes.
//!
//! Durations are configured in seconds (`{"welding": 8, "testing": 3}`) and
//! double as the worker's bid cost.

use std::collections::BTreeMap;
use std::time::Duration;

use cnp_proto::JobType;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Longest job duration a table accepts: one year.
pub const MAX_JOB_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Mapping from job type to execution duration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct CapabilityTable {
    entries: BTreeMap<JobType, Duration>,
}

impl CapabilityTable {
    /// Creates an empty table (the worker rejects every job).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(job type, seconds)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Capability`] if a job type is blank or a
    /// duration is negative, not finite, or above [`MAX_JOB_DURATION`].
    pub fn from_secs<I, S>(entries: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (job, secs) in entries {
            table = table.with_secs(job, secs)?;
        }
        Ok(table)
    }

    /// Adds one entry given in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Capability`] on a blank job type or an invalid
    /// duration.
    pub fn with_secs(mut self, job: impl Into<String>, secs: f64) -> Result<Self, AgentError> {
        let job = job.into();
        let job_type =
            JobType::new(job.clone()).map_err(|e| AgentError::Capability(e.to_string()))?;
        let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
            AgentError::Capability(format!(
                "duration for '{job}' must be a finite non-negative number of seconds, got {secs}"
            ))
        })?;
        if duration > MAX_JOB_DURATION {
            return Err(AgentError::Capability(format!(
                "duration for '{job}' exceeds {} seconds, got {secs}",
                MAX_JOB_DURATION.as_secs()
            )));
        }
        self.entries.insert(job_type, duration);
        Ok(self)
    }

    /// Adds one entry.
    pub fn insert(&mut self, job_type: JobType, duration: Duration) {
        self.entries.insert(job_type, duration);
    }

    /// Execution duration for `job_type`, if the worker can perform it.
    #[must_use]
    pub fn duration(&self, job_type: &JobType) -> Option<Duration> {
        self.entries.get(job_type).copied()
    }

    /// Returns true if the worker can perform `job_type`.
    #[must_use]
    pub fn can_perform(&self, job_type: &JobType) -> bool {
        self.entries.contains_key(job_type)
    }

    /// Iterates entries in job type order.
    pub fn iter(&self) -> impl Iterator<Item = (&JobType, Duration)> {
        self.entries.iter().map(|(job, d)| (job, *d))
    }

    /// Number of job types in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<BTreeMap<String, f64>> for CapabilityTable {
    type Error = AgentError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        Self::from_secs(map)
    }
}

impl From<CapabilityTable> for BTreeMap<String, f64> {
    fn from(table: CapabilityTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(job, d)| (job.into(), d.as_secs_f64()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn job(name: &str) -> JobType {
        JobType::new(name).unwrap()
    }

    #[test]
    fn lookup_by_job_type() {
        let table = CapabilityTable::from_secs([("assembly", 5.0), ("welding", 8.0)]).unwrap();
        assert_eq!(table.duration(&job("welding")), Some(Duration::from_secs(8)));
        assert!(table.can_perform(&job("assembly")));
        assert!(!table.can_perform(&job("testing")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn fractional_seconds() {
        let table = CapabilityTable::from_secs([("packaging", 2.5)]).unwrap();
        assert_eq!(table.duration(&job("packaging")), Some(Duration::from_millis(2500)));
    }

    #[test_case(-1.0 ; "negative")]
    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    #[test_case(1e19 ; "beyond one year")]
    fn invalid_durations(secs: f64) {
        assert!(matches!(
            CapabilityTable::from_secs([("welding", secs)]),
            Err(AgentError::Capability(_))
        ));
    }

    #[test]
    fn one_year_is_the_longest_duration() {
        let secs = MAX_JOB_DURATION.as_secs_f64();
        let table = CapabilityTable::from_secs([("curing", secs)]).unwrap();
        assert_eq!(table.duration(&job("curing")), Some(MAX_JOB_DURATION));
        assert!(CapabilityTable::from_secs([("curing", secs + 1.0)]).is_err());
    }

    #[test]
    fn blank_job_type_is_refused() {
        assert!(CapabilityTable::from_secs([(" ", 1.0)]).is_err());
    }

    #[test]
    fn deserializes_from_json_object() {
        let table: CapabilityTable =
            serde_json::from_str(r#"{"painting": 4, "testing": 3}"#).unwrap();
        assert_eq!(table.duration(&job("painting")), Some(Duration::from_secs(4)));
        assert_eq!(table.duration(&job("testing")), Some(Duration::from_secs(3)));
    }

    #[test]
    fn deserialization_validates() {
        let bad: Result<CapabilityTable, _> = serde_json::from_str(r#"{"painting": -4}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn empty_table_performs_nothing() {
        let table = CapabilityTable::new();
        assert!(table.is_empty());
        assert_eq!(table.duration(&job("welding")), None);
    }
}
