//! Auth configuration and the shared state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    audit::{AuditEvent, AuditKind, AuditSink},
    credentials::CredentialVerifier,
    gate::Gate,
    metrics::AuthMetrics,
    rate_limit::{
        FixedWindowLimiter, RateLimitDecision, RateLimitPolicy, RateLimitScope, RateLimiter,
    },
    reset::{PasswordResetService, ResetNotifier},
    session::SessionStore,
    token::{AccessTokenSigner, TokenService},
    AuthError,
};
use crate::clock::Clock;
use crate::store::{DurableStore, VolatileStore};

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
const DEFAULT_LOGIN_RATE_LIMIT_MAX_REQUESTS: u32 = 10;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_METRICS_INTERVAL_SECONDS: u64 = 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    session_ttl_seconds: u64,
    password_reset_ttl_seconds: u64,
    rate_limit_window_seconds: u64,
    rate_limit_max_requests: u32,
    login_rate_limit_max_requests: u32,
    store_timeout_ms: u64,
    metrics_interval_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            login_rate_limit_max_requests: DEFAULT_LOGIN_RATE_LIMIT_MAX_REQUESTS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            metrics_interval_seconds: DEFAULT_METRICS_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_seconds(mut self, seconds: u64) -> Self {
        self.password_reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_limit_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limit_max_requests(mut self, max_requests: u32) -> Self {
        self.rate_limit_max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit_max_requests(mut self, max_requests: u32) -> Self {
        self.login_rate_limit_max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_store_timeout_ms(mut self, millis: u64) -> Self {
        self.store_timeout_ms = millis;
        self
    }

    #[must_use]
    pub fn with_metrics_interval_seconds(mut self, seconds: u64) -> Self {
        self.metrics_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn password_reset_ttl_seconds(&self) -> u64 {
        self.password_reset_ttl_seconds
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds.max(1))
    }

    /// Budget for authenticated API calls, keyed by user id.
    #[must_use]
    pub fn api_rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            Duration::from_secs(self.rate_limit_window_seconds),
            self.rate_limit_max_requests,
        )
    }

    /// Budget for unauthenticated auth endpoints, keyed by client address.
    #[must_use]
    pub fn login_rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            Duration::from_secs(self.rate_limit_window_seconds),
            self.login_rate_limit_max_requests,
        )
    }
}

/// Backends the auth services run against.
#[derive(Clone)]
pub struct AuthBackends {
    pub durable: Arc<dyn DurableStore>,
    pub volatile: Arc<dyn VolatileStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn ResetNotifier>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct AuthState {
    config: AuthConfig,
    durable: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionStore>,
    credentials: CredentialVerifier,
    reset: PasswordResetService,
    limiter: Arc<dyn RateLimiter>,
    metrics: Arc<AuthMetrics>,
    gate: Gate,
}

impl AuthState {
    /// Wire the auth services over the given backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential verifier cannot be initialized.
    pub fn new(
        config: AuthConfig,
        signer: AccessTokenSigner,
        backends: AuthBackends,
    ) -> Result<Self, AuthError> {
        let AuthBackends {
            durable,
            volatile,
            clock,
            notifier,
            audit,
        } = backends;

        let tokens = Arc::new(
            TokenService::new(signer, durable.clone(), volatile.clone(), clock.clone())
                .with_access_ttl(chrono::Duration::seconds(config.access_token_ttl_seconds))
                .with_refresh_ttl(chrono::Duration::seconds(config.refresh_token_ttl_seconds)),
        );
        let sessions = Arc::new(SessionStore::new(
            volatile.clone(),
            clock,
            Duration::from_secs(config.session_ttl_seconds),
        ));
        let credentials = CredentialVerifier::new(durable.clone())?;
        let reset = PasswordResetService::new(
            durable.clone(),
            volatile.clone(),
            tokens.clone(),
            sessions.clone(),
            notifier,
        )
        .with_ttl(Duration::from_secs(config.password_reset_ttl_seconds))
        .with_frontend_base_url(config.frontend_base_url.clone());

        let limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindowLimiter::new(volatile.clone()));
        let metrics = Arc::new(AuthMetrics::new());
        let gate = Gate::new(
            tokens.clone(),
            durable.clone(),
            limiter.clone(),
            config.api_rate_limit(),
            audit,
            metrics.clone(),
        );

        Ok(Self {
            config,
            durable,
            volatile,
            tokens,
            sessions,
            credentials,
            reset,
            limiter,
            metrics,
            gate,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    #[must_use]
    pub fn volatile(&self) -> &Arc<dyn VolatileStore> {
        &self.volatile
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<AuthMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub(super) fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    pub(super) fn reset(&self) -> &PasswordResetService {
        &self.reset
    }

    /// Count an unauthenticated request against its client address budget.
    /// Denials are counted and audited here.
    pub(super) async fn limit_client(
        &self,
        scope: RateLimitScope,
        client_ip: Option<&str>,
    ) -> RateLimitDecision {
        let decision = self
            .limiter
            .allow(
                scope,
                client_ip.unwrap_or("unknown"),
                self.config.login_rate_limit(),
            )
            .await;
        if !decision.is_admitted() {
            self.metrics.rate_limited();
            self.gate.report(
                AuditEvent::new(AuditKind::RateLimited)
                    .client_ip(client_ip)
                    .detail(scope.as_str()),
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = AuthConfig::new("https://agora.localhost".to_string());
        assert_eq!(config.access_token_ttl_seconds(), 3600);
        assert_eq!(config.refresh_token_ttl_seconds(), 604_800);
        assert_eq!(config.session_ttl_seconds(), 86_400);
        assert_eq!(config.store_timeout(), Duration::from_millis(2000));
        assert_eq!(config.api_rate_limit().max_requests, 100);
        assert_eq!(config.login_rate_limit().max_requests, 10);
        assert_eq!(config.login_rate_limit().window, Duration::from_secs(60));
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = AuthConfig::new("https://agora.test".to_string())
            .with_rate_limit_window_seconds(10)
            .with_rate_limit_max_requests(5)
            .with_login_rate_limit_max_requests(2)
            .with_metrics_interval_seconds(0);
        assert_eq!(config.api_rate_limit(), RateLimitPolicy::new(Duration::from_secs(10), 5));
        assert_eq!(config.login_rate_limit().max_requests, 2);
        assert_eq!(config.metrics_interval(), Duration::from_secs(1));
    }
}
