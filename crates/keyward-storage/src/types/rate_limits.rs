//! Per-user rate-limit rules.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Matches any service or api.
pub const WILDCARD: &str = "*";

/// One quota rule in a user's rule set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub api: String,
    pub capacity: i64,
    #[serde(with = "duration_millis")]
    pub reset_duration: Duration,
}

impl RateLimitRule {
    /// Empty or `*` matchers accept anything.
    pub fn matches(&self, service: &str, api: &str) -> bool {
        matcher_accepts(&self.service, service) && matcher_accepts(&self.api, api)
    }

    /// Ranks a matching rule: an exact service beats an exact api.
    pub fn specificity(&self) -> u8 {
        let mut score = 0;
        if !is_wildcard(&self.service) {
            score += 2;
        }
        if !is_wildcard(&self.api) {
            score += 1;
        }
        score
    }
}

fn is_wildcard(matcher: &str) -> bool {
    matcher.is_empty() || matcher == WILDCARD
}

fn matcher_accepts(matcher: &str, value: &str) -> bool {
    is_wildcard(matcher) || matcher == value
}

mod duration_millis {
    use serde::{ser::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(d.as_millis())
            .map_err(|_| S::Error::custom(format!("duration {d:?} overflows u64 milliseconds")))?;
        s.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
