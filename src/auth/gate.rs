//! Request gate: the per-request pipeline in front of protected operations.
//!
//! Steps run in a fixed order and stop at the first rejection:
//! authenticate (bearer access token) -> rate limit (per subject) ->
//! resolve (fresh identity and abilities) -> authorize -> report.
//! Every rejection is reported to the audit sink before it is returned.

use std::sync::Arc;
use tracing::error;

use super::ability::{define_abilities, Action, Resource, ResourceType, RuleSet};
use super::audit::{AuditEvent, AuditKind, AuditSink};
use super::identity::Identity;
use super::metrics::AuthMetrics;
use super::rate_limit::{RateLimitPolicy, RateLimitScope, RateLimitStatus, RateLimiter};
use super::token::{AccessClaims, TokenService};
use crate::store::DurableStore;

/// Caller facts extracted from the transport.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub bearer: Option<String>,
}

/// An authenticated, admitted caller.
#[derive(Clone, Debug)]
pub struct Principal {
    pub claims: AccessClaims,
    pub identity: Identity,
    pub abilities: RuleSet,
    pub rate_limit: RateLimitStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateRejection {
    /// Missing, malformed, forged or expired token, or the subject is gone.
    Unauthenticated,
    RateLimited(RateLimitStatus),
    /// Generic denial; never says which rule was missing.
    Forbidden,
    /// A collaborator failed; maps to a server error.
    Unavailable,
}

pub struct Gate {
    tokens: Arc<TokenService>,
    durable: Arc<dyn DurableStore>,
    limiter: Arc<dyn RateLimiter>,
    policy: RateLimitPolicy,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<AuthMetrics>,
}

impl Gate {
    #[must_use]
    pub fn new(
        tokens: Arc<TokenService>,
        durable: Arc<dyn DurableStore>,
        limiter: Arc<dyn RateLimiter>,
        policy: RateLimitPolicy,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self {
            tokens,
            durable,
            limiter,
            policy,
            audit,
            metrics,
        }
    }

    /// Verify the bearer token. No store access.
    ///
    /// # Errors
    ///
    /// Returns [`GateRejection::Unauthenticated`] for a missing or invalid token.
    pub fn authenticate(&self, ctx: &RequestContext) -> Result<AccessClaims, GateRejection> {
        let Some(token) = ctx.bearer.as_deref() else {
            self.report(
                AuditEvent::new(AuditKind::AuthenticationFailed)
                    .client_ip(ctx.client_ip.as_deref())
                    .detail("missing bearer token"),
            );
            return Err(GateRejection::Unauthenticated);
        };
        self.tokens.verify_access_token(token).map_err(|err| {
            self.report(
                AuditEvent::new(AuditKind::AuthenticationFailed)
                    .client_ip(ctx.client_ip.as_deref())
                    .detail(err.to_string()),
            );
            GateRejection::Unauthenticated
        })
    }

    /// Count the request against the subject's API window.
    ///
    /// # Errors
    ///
    /// Returns [`GateRejection::RateLimited`] once the window is exhausted.
    pub async fn rate_limit(
        &self,
        ctx: &RequestContext,
        claims: &AccessClaims,
    ) -> Result<RateLimitStatus, GateRejection> {
        let decision = self
            .limiter
            .allow(RateLimitScope::Api, &claims.sub.to_string(), self.policy)
            .await;
        if decision.is_admitted() {
            return Ok(decision.status());
        }
        self.metrics.rate_limited();
        self.report(
            AuditEvent::new(AuditKind::RateLimited)
                .actor(Some(claims.sub))
                .client_ip(ctx.client_ip.as_deref()),
        );
        Err(GateRejection::RateLimited(decision.status()))
    }

    /// Load the current identity and derive its abilities.
    ///
    /// # Errors
    ///
    /// Returns [`GateRejection::Unauthenticated`] when the subject no longer
    /// exists and [`GateRejection::Unavailable`] when the store fails.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        claims: &AccessClaims,
    ) -> Result<(Identity, RuleSet), GateRejection> {
        match self.durable.find_identity(claims.sub).await {
            Ok(Some(identity)) => {
                let abilities = define_abilities(&identity);
                Ok((identity, abilities))
            }
            Ok(None) => {
                self.report(
                    AuditEvent::new(AuditKind::AuthenticationFailed)
                        .actor(Some(claims.sub))
                        .client_ip(ctx.client_ip.as_deref())
                        .detail("subject not found"),
                );
                Err(GateRejection::Unauthenticated)
            }
            Err(err) => {
                error!(user_id = %claims.sub, "Failed to resolve identity: {err}");
                Err(GateRejection::Unavailable)
            }
        }
    }

    /// Check an ability for an admitted principal.
    ///
    /// # Errors
    ///
    /// Returns [`GateRejection::Forbidden`] when no rule allows the action.
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        action: Action,
        resource_type: ResourceType,
        instance: Option<&Resource>,
    ) -> Result<(), GateRejection> {
        if principal.abilities.can(action, resource_type, instance) {
            return Ok(());
        }
        self.metrics.authorization_denied();
        self.report(
            AuditEvent::new(AuditKind::AuthorizationDenied)
                .actor(Some(principal.identity.id))
                .target(action, resource_type)
                .client_ip(ctx.client_ip.as_deref()),
        );
        Err(GateRejection::Forbidden)
    }

    /// Authenticate, rate limit and resolve.
    ///
    /// # Errors
    ///
    /// Returns the rejection of the first failing step.
    pub async fn admit(&self, ctx: &RequestContext) -> Result<Principal, GateRejection> {
        let claims = self.authenticate(ctx)?;
        let rate_limit = self.rate_limit(ctx, &claims).await?;
        let (identity, abilities) = self.resolve(ctx, &claims).await?;
        Ok(Principal {
            claims,
            identity,
            abilities,
            rate_limit,
        })
    }

    /// Full pipeline for one protected operation.
    ///
    /// # Errors
    ///
    /// Returns the rejection of the first failing step.
    pub async fn require(
        &self,
        ctx: &RequestContext,
        action: Action,
        resource_type: ResourceType,
        instance: Option<&Resource>,
    ) -> Result<Principal, GateRejection> {
        let principal = self.admit(ctx).await?;
        self.authorize(ctx, &principal, action, resource_type, instance)?;
        Ok(principal)
    }

    pub fn report(&self, event: AuditEvent) {
        self.audit.record(&event);
    }
}
