//! Resolve the quota that applies to one call of one user.

use std::time::Duration;

use async_trait::async_trait;
use keyward_auth::AuthService;
use keyward_storage::RateLimitRule;

use crate::{ClientError, RemoteClient};

/// Quota for a `(user, service, api)` call. The zero value means no limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Limit {
    pub capacity: i64,
    pub reset_duration: Duration,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0
    }
}

/// Where a user's rule set comes from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn rules_for(&self, name: &str) -> Result<Vec<RateLimitRule>, ClientError>;
}

#[async_trait]
impl RuleSource for AuthService {
    async fn rules_for(&self, name: &str) -> Result<Vec<RateLimitRule>, ClientError> {
        Ok(self.get_rate_limits(name, None).await?)
    }
}

#[async_trait]
impl RuleSource for RemoteClient {
    async fn rules_for(&self, name: &str) -> Result<Vec<RateLimitRule>, ClientError> {
        self.get_rate_limits(name, None).await
    }
}

/// Most specific matching rule. An exact service outranks an exact api, which outranks a
/// full wildcard; ties go to the lowest rule id.
pub fn select_rule<'a>(
    rules: &'a [RateLimitRule],
    service: &str,
    api: &str,
) -> Option<&'a RateLimitRule> {
    rules
        .iter()
        .filter(|r| r.matches(service, api))
        .min_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then_with(|| a.id.cmp(&b.id))
        })
}

pub struct LimitFinder<S> {
    source: S,
}

impl<S: RuleSource> LimitFinder<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn resolve_limit(
        &self,
        name: &str,
        service: &str,
        api: &str,
    ) -> Result<Limit, ClientError> {
        let rules = self.source.rules_for(name).await?;
        Ok(select_rule(&rules, service, api)
            .map(|r| Limit {
                capacity: r.capacity,
                reset_duration: r.reset_duration,
            })
            .unwrap_or_default())
    }
}
