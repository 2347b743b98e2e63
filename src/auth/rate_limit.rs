//! Fixed-window rate limiting on top of the volatile store.
//!
//! Flow Overview:
//! 1) Each request increments `rate:{scope}:{identifier}` atomically; the
//!    first increment of a window sets the key's TTL to the window length.
//! 2) The request is admitted while the count is at most `max_requests`.
//! 3) When the store is unreachable the limiter fails open and logs a warning,
//!    so an outage of the counter store never locks users out.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::store::{keys, VolatileStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitScope {
    Login,
    Refresh,
    PasswordReset,
    Api,
}

impl RateLimitScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Refresh => "refresh",
            Self::PasswordReset => "password_reset",
            Self::Api => "api",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

/// Counter state reported back to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_after: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admitted(RateLimitStatus),
    Denied(RateLimitStatus),
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    #[must_use]
    pub fn status(&self) -> RateLimitStatus {
        match self {
            Self::Admitted(status) | Self::Denied(status) => *status,
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(
        &self,
        scope: RateLimitScope,
        identifier: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(
        &self,
        _scope: RateLimitScope,
        _identifier: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        RateLimitDecision::Admitted(RateLimitStatus {
            limit: policy.max_requests,
            remaining: policy.max_requests,
            reset_after: policy.window,
        })
    }
}

pub struct FixedWindowLimiter {
    store: Arc<dyn VolatileStore>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn VolatileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(
        &self,
        scope: RateLimitScope,
        identifier: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        let key = keys::rate_limit(scope.as_str(), identifier);
        let counter = match self.store.incr(&key, policy.window).await {
            Ok(counter) => counter,
            Err(err) => {
                warn!(
                    scope = scope.as_str(),
                    "Rate limit store unavailable, admitting request: {err}"
                );
                return NoopRateLimiter.allow(scope, identifier, policy).await;
            }
        };

        let limit = policy.max_requests;
        let used = u32::try_from(counter.value).unwrap_or(u32::MAX);
        let status = RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(used),
            reset_after: counter.ttl,
        };
        if used > limit {
            RateLimitDecision::Denied(status)
        } else {
            RateLimitDecision::Admitted(status)
        }
    }
}
