//! Topic filters.
//!
//! Topics are `/`-separated levels. A filter level is either an exact level,
//! `+` (exactly one level) or, as the last level only, `#` (zero or more
//! remaining levels).

use std::fmt;

use crate::error::{BusError, BusResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Exact(String),
    Single,
    Multi,
}

/// A parsed subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    /// Parses a subscription filter.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidFilter`] if the filter is empty, `#` is not
    /// the last level, or a wildcard shares a level with other characters.
    pub fn parse(filter: &str) -> BusResult<Self> {
        let invalid = |reason| BusError::InvalidFilter {
            filter: filter.to_string(),
            reason,
        };

        if filter.is_empty() {
            return Err(invalid("filter cannot be empty"));
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());
        for (i, part) in parts.into_iter().enumerate() {
            let level = match part {
                "+" => Level::Single,
                "#" if i == last => Level::Multi,
                "#" => return Err(invalid("'#' must be the last level")),
                p if p.contains(['+', '#']) => {
                    return Err(invalid("wildcards must occupy a whole level"))
                }
                p => Level::Exact(p.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: filter.to_string(),
            levels,
        })
    }

    /// Returns the filter as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if `topic` matches this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Exact(expected) => {
                    if topic_levels.next() != Some(expected.as_str()) {
                        return false;
                    }
                }
            }
        }
        topic_levels.next().is_none()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Checks that `topic` can be published to.
///
/// # Errors
///
/// Returns [`BusError::InvalidTopic`] if the topic is empty or contains a
/// wildcard character.
pub fn validate_topic(topic: &str) -> BusResult<()> {
    if topic.is_empty() {
        return Err(BusError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic cannot be empty",
        });
    }
    if topic.contains(['+', '#']) {
        return Err(BusError::InvalidTopic {
            topic: topic.to_string(),
            reason: "wildcards are not publishable",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("/cfp", "/cfp", true ; "exact")]
    #[test_case("/cfp", "/bids", false ; "different topic")]
    #[test_case("/cfp", "cfp", false ; "missing root level")]
    #[test_case("/assign/+", "/assign/M1", true ; "single wildcard")]
    #[test_case("/assign/+", "/assign", false ; "single wildcard needs a level")]
    #[test_case("/assign/+", "/assign/M1/x", false ; "single wildcard is one level")]
    #[test_case("/assign/M1", "/assign/M10", false ; "no prefix matching")]
    #[test_case("/fleet/#", "/fleet/cfp", true ; "multi wildcard")]
    #[test_case("/fleet/#", "/fleet/assign/M1", true ; "multi wildcard deep")]
    #[test_case("/fleet/#", "/fleet", true ; "multi wildcard matches parent")]
    #[test_case("#", "/anything/at/all", true ; "match everything")]
    #[test_case("/+/cfp", "/fleet/cfp", true ; "leading single wildcard")]
    fn filter_matching(filter: &str, topic: &str, expected: bool) {
        assert_eq!(TopicFilter::parse(filter).unwrap().matches(topic), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("/a/#/b" ; "multi wildcard not last")]
    #[test_case("/a+" ; "partial single wildcard")]
    #[test_case("/a/b#" ; "partial multi wildcard")]
    fn invalid_filters(filter: &str) {
        assert!(matches!(
            TopicFilter::parse(filter),
            Err(BusError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn publish_topic_validation() {
        assert!(validate_topic("/bids").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("/assign/+").is_err());
        assert!(validate_topic("/#").is_err());
    }

    proptest! {
        #[test]
        fn exact_filter_matches_only_itself(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let topic = format!("/{a}/{b}");
            let filter = TopicFilter::parse(&topic).unwrap();
            prop_assert!(filter.matches(&topic));
            let other = format!("/{b}/{a}x");
            prop_assert!(!filter.matches(&other));
        }
    }
}
