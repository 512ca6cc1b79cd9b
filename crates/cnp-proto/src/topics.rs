//! Topic layout of the negotiation protocol.
//!
//! ```text
//! {prefix}/cfp                 coordinator -> all workers
//! {prefix}/bids                workers     -> coordinator
//! {prefix}/assign/{worker_id}  coordinator -> winner
//! {prefix}/reject/{worker_id}  coordinator -> losing proposers
//! {prefix}/job_complete        workers     -> coordinator
//! ```
//!
//! The prefix is empty by default, which yields the classic `/cfp`,
//! `/bids`, ... topics. A non-empty prefix lets several fleets share one
//! broker.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::types::WorkerId;

const CFP: &str = "cfp";
const BIDS: &str = "bids";
const ASSIGN: &str = "assign";
const REJECT: &str = "reject";
const JOB_COMPLETE: &str = "job_complete";

/// A decoded protocol topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Broadcast call-for-proposal topic.
    Cfp,
    /// Bids topic.
    Bids,
    /// Assignment topic of one worker.
    Assign(WorkerId),
    /// Rejection topic of one worker.
    Reject(WorkerId),
    /// Job completion topic.
    JobComplete,
}

/// Builds and parses topic strings under an optional namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    /// Topics without a namespace (`/cfp`, `/bids`, ...).
    #[must_use]
    pub const fn root() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    /// Topics under `/{namespace}`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if the namespace contains wildcard
    /// characters or empty levels.
    pub fn with_namespace(namespace: &str) -> Result<Self, ProtoError> {
        let trimmed = namespace.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed
            .split('/')
            .any(|level| level.is_empty() || level.contains(['+', '#']))
        {
            return Err(ProtoError::Validation(format!(
                "invalid topic namespace '{namespace}'"
            )));
        }
        Ok(Self {
            prefix: format!("/{trimmed}"),
        })
    }

    /// Returns the namespace prefix (empty for root topics).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Call-for-proposal topic.
    #[must_use]
    pub fn cfp(&self) -> String {
        format!("{}/{CFP}", self.prefix)
    }

    /// Bids topic.
    #[must_use]
    pub fn bids(&self) -> String {
        format!("{}/{BIDS}", self.prefix)
    }

    /// Assignment topic of `worker`.
    #[must_use]
    pub fn assign(&self, worker: &WorkerId) -> String {
        format!("{}/{ASSIGN}/{worker}", self.prefix)
    }

    /// Rejection topic of `worker`.
    #[must_use]
    pub fn reject(&self, worker: &WorkerId) -> String {
        format!("{}/{REJECT}/{worker}", self.prefix)
    }

    /// Job completion topic.
    #[must_use]
    pub fn job_complete(&self) -> String {
        format!("{}/{JOB_COMPLETE}", self.prefix)
    }

    /// Filter matching every per-worker rejection topic.
    #[must_use]
    pub fn all_rejects(&self) -> String {
        format!("{}/{REJECT}/+", self.prefix)
    }

    /// Filter matching every per-worker assignment topic.
    #[must_use]
    pub fn all_assigns(&self) -> String {
        format!("{}/{ASSIGN}/+", self.prefix)
    }

    /// Decodes a concrete topic string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownTopic`] if the topic is outside this
    /// namespace or not part of the protocol.
    pub fn parse(&self, topic: &str) -> Result<Topic, ProtoError> {
        let unknown = || ProtoError::UnknownTopic(topic.to_string());
        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;

        let mut levels = rest.splitn(2, '/');
        let head = levels.next().unwrap_or_default();
        let tail = levels.next();

        match (head, tail) {
            (CFP, None) => Ok(Topic::Cfp),
            (BIDS, None) => Ok(Topic::Bids),
            (JOB_COMPLETE, None) => Ok(Topic::JobComplete),
            (ASSIGN, Some(id)) => WorkerId::new(id).map(Topic::Assign).map_err(|_| unknown()),
            (REJECT, Some(id)) => WorkerId::new(id).map(Topic::Reject).map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn m1() -> WorkerId {
        WorkerId::new("M1").unwrap()
    }

    #[test]
    fn root_topics_match_classic_layout() {
        let topics = Topics::root();
        assert_eq!(topics.cfp(), "/cfp");
        assert_eq!(topics.bids(), "/bids");
        assert_eq!(topics.assign(&m1()), "/assign/M1");
        assert_eq!(topics.reject(&m1()), "/reject/M1");
        assert_eq!(topics.job_complete(), "/job_complete");
        assert_eq!(topics.all_rejects(), "/reject/+");
    }

    #[test]
    fn namespaced_topics() {
        let topics = Topics::with_namespace("plant-a/line-2/").unwrap();
        assert_eq!(topics.prefix(), "/plant-a/line-2");
        assert_eq!(topics.cfp(), "/plant-a/line-2/cfp");
        assert_eq!(topics.assign(&m1()), "/plant-a/line-2/assign/M1");
    }

    #[test_case("" ; "empty")]
    #[test_case("/" ; "only separator")]
    fn blank_namespace_is_root(ns: &str) {
        assert_eq!(Topics::with_namespace(ns).unwrap(), Topics::root());
    }

    #[test_case("a/+/b" ; "single wildcard")]
    #[test_case("a/#" ; "multi wildcard")]
    #[test_case("a//b" ; "empty level")]
    fn invalid_namespace(ns: &str) {
        assert!(Topics::with_namespace(ns).is_err());
    }

    #[test]
    fn parse_round_trips_builders() {
        let topics = Topics::with_namespace("fleet").unwrap();
        assert_eq!(topics.parse(&topics.cfp()).unwrap(), Topic::Cfp);
        assert_eq!(topics.parse(&topics.bids()).unwrap(), Topic::Bids);
        assert_eq!(topics.parse(&topics.job_complete()).unwrap(), Topic::JobComplete);
        assert_eq!(topics.parse(&topics.assign(&m1())).unwrap(), Topic::Assign(m1()));
        assert_eq!(topics.parse(&topics.reject(&m1())).unwrap(), Topic::Reject(m1()));
    }

    #[test_case("/weather" ; "foreign topic")]
    #[test_case("/cfp/extra" ; "extra level")]
    #[test_case("/assign" ; "assign without worker")]
    #[test_case("/assign/a/b" ; "worker with separator")]
    #[test_case("cfp" ; "missing leading slash")]
    fn parse_rejects(topic: &str) {
        assert!(matches!(
            Topics::root().parse(topic),
            Err(ProtoError::UnknownTopic(_))
        ));
    }

    #[test]
    fn parse_rejects_other_namespace() {
        let topics = Topics::with_namespace("fleet").unwrap();
        assert!(topics.parse("/cfp").is_err());
        assert!(topics.parse("/fleetx/cfp").is_err());
    }
}
