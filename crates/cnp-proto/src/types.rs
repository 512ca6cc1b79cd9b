//! Identifier types shared by the coordinator and the workers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Maximum length of a worker identifier.
pub const MAX_WORKER_ID_LEN: usize = 64;

/// Correlation id of a call-for-proposal.
///
/// Allocated by the coordinator, starting at 1 and never reused within a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CfpId(u64);

impl CfpId {
    /// Wraps a raw correlation id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for CfpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a worker agent.
///
/// Worker ids become a topic level (`/assign/{id}`), so they may not contain
/// the level separator or wildcard characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a validated worker id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if the id is empty, too long, or
    /// contains `/`, `+`, `#` or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtoError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtoError::Validation("worker id cannot be empty".into()));
        }
        if id.len() > MAX_WORKER_ID_LEN {
            return Err(ProtoError::Validation(format!(
                "worker id cannot exceed {MAX_WORKER_ID_LEN} characters"
            )));
        }
        if id
            .chars()
            .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
        {
            return Err(ProtoError::Validation(format!(
                "worker id '{id}' contains a reserved character"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkerId {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of job being negotiated, e.g. `"welding"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobType(String);

impl JobType {
    /// Creates a job type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if the name is empty or blank.
    pub fn new(name: impl Into<String>) -> Result<Self, ProtoError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProtoError::Validation("job type cannot be empty".into()));
        }
        Ok(Self(name))
    }

    /// Returns the job type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobType {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobType> for String {
    fn from(job: JobType) -> Self {
        job.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
