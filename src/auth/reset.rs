//! Forgot/reset password flow.
//!
//! Flow Overview:
//! 1) `request` looks up the email. Unknown or inactive accounts get the same
//!    outcome as known ones so callers cannot tell which accounts exist.
//! 2) A single-use token is stored hashed under `password_reset:{hash}` with
//!    a TTL and a link is handed to the [`ResetNotifier`].
//! 3) `reset` consumes the token atomically, stores the new Argon2 hash and
//!    then revokes every refresh token and session of the user.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::credentials::{hash_password, validate_password};
use super::error::AuthError;
use super::secret::{generate_opaque_token, hash_token};
use super::session::SessionStore;
use super::token::TokenService;
use crate::store::{keys, DurableStore, VolatileStore};

/// Delivery of reset links (email in production).
pub trait ResetNotifier: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the link could not be handed off.
    fn send(&self, email: &str, reset_url: &str) -> Result<()>;
}

/// Local dev notifier that logs instead of sending mail.
#[derive(Clone, Debug)]
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn send(&self, email: &str, reset_url: &str) -> Result<()> {
        info!(to_email = %email, reset_url = %reset_url, "password reset send stub");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Completed { user_id: Uuid },
    InvalidToken,
    WeakPassword(&'static str),
}

pub struct PasswordResetService {
    durable: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    tokens: Arc<TokenService>,
    sessions: Arc<SessionStore>,
    notifier: Arc<dyn ResetNotifier>,
    ttl: Duration,
    frontend_base_url: String,
}

impl PasswordResetService {
    #[must_use]
    pub fn new(
        durable: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        tokens: Arc<TokenService>,
        sessions: Arc<SessionStore>,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Self {
        Self {
            durable,
            volatile,
            tokens,
            sessions,
            notifier,
            ttl: Duration::from_secs(3600),
            frontend_base_url: "https://agora.localhost".to_string(),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start a reset. Returns the user id when a link was issued; callers
    /// must respond identically either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the stores or randomness fail.
    pub async fn request(&self, email: &str) -> Result<Option<Uuid>, AuthError> {
        let email = email.trim().to_lowercase();
        let Some(record) = self.durable.find_credentials(&email).await? else {
            return Ok(None);
        };
        if !record.identity.is_active() {
            return Ok(None);
        }

        let token = generate_opaque_token()?;
        self.volatile
            .set(
                &keys::password_reset(&hash_token(&token)),
                &record.identity.id.to_string(),
                Some(self.ttl),
            )
            .await?;

        let reset_url = format!("{}/reset-password?token={token}", self.frontend_base_url);
        if let Err(err) = self.notifier.send(&record.identity.email, &reset_url) {
            warn!(user_id = %record.identity.id, "Failed to send password reset link: {err}");
        }
        Ok(Some(record.identity.id))
    }

    /// Complete a reset with a token from [`Self::request`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stores or hashing fail.
    pub async fn reset(&self, token: &str, new_password: &str) -> Result<ResetOutcome, AuthError> {
        if let Err(reason) = validate_password(new_password) {
            return Ok(ResetOutcome::WeakPassword(reason));
        }

        let Some(raw_user_id) = self
            .volatile
            .take(&keys::password_reset(&hash_token(token)))
            .await?
        else {
            return Ok(ResetOutcome::InvalidToken);
        };
        let Ok(user_id) = raw_user_id.parse::<Uuid>() else {
            warn!("Discarding password reset token with unreadable subject");
            return Ok(ResetOutcome::InvalidToken);
        };

        let password = new_password.to_string();
        let phc = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        if !self.durable.update_password_hash(user_id, &phc).await? {
            return Ok(ResetOutcome::InvalidToken);
        }

        self.tokens.revoke_all(user_id).await?;
        self.sessions.delete_all_for_user(user_id).await?;

        Ok(ResetOutcome::Completed { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{CredentialVerifier, LoginOutcome};
    use crate::auth::identity::{Identity, LinkedProfiles, Role, Status};
    use crate::auth::session::ClientInfo;
    use crate::auth::token::{AccessTokenSigner, RefreshOutcome};
    use crate::clock::ManualClock;
    use crate::store::{MemoryDurableStore, MemoryVolatileStore};
    use chrono::Utc;
    use secrecy::SecretString;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        links: Mutex<Vec<String>>,
    }

    impl ResetNotifier for CapturingNotifier {
        fn send(&self, _email: &str, reset_url: &str) -> Result<()> {
            self.links.lock().expect("lock").push(reset_url.to_string());
            Ok(())
        }
    }

    struct Fixture {
        service: PasswordResetService,
        notifier: Arc<CapturingNotifier>,
        durable: Arc<MemoryDurableStore>,
        tokens: Arc<TokenService>,
        sessions: Arc<SessionStore>,
        clock: Arc<ManualClock>,
        identity: Identity,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let durable = Arc::new(MemoryDurableStore::new());
        let volatile = Arc::new(MemoryVolatileStore::new(clock.clone()));
        let identity = Identity {
            id: Uuid::new_v4(),
            email: "reset@agora.test".to_string(),
            role: Role::Client,
            status: Status::Active,
            profiles: LinkedProfiles::default(),
        };
        durable
            .insert_identity(identity.clone(), hash_password("old-password")?)
            .await;

        let signer = AccessTokenSigner::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))?;
        let tokens = Arc::new(TokenService::new(
            signer,
            durable.clone(),
            volatile.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            volatile.clone(),
            clock.clone(),
            Duration::from_secs(3600),
        ));
        let notifier = Arc::new(CapturingNotifier::default());
        let service = PasswordResetService::new(
            durable.clone(),
            volatile,
            tokens.clone(),
            sessions.clone(),
            notifier.clone(),
        )
        .with_frontend_base_url("https://agora.test/");
        Ok(Fixture {
            service,
            notifier,
            durable,
            tokens,
            sessions,
            clock,
            identity,
        })
    }

    fn token_from(link: &str) -> &str {
        link.split("token=").nth(1).unwrap_or_default()
    }

    #[tokio::test]
    async fn reset_replaces_password_and_revokes_everything() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let pair = fx.tokens.issue_pair(&fx.identity).await?;
        let session_id = fx
            .sessions
            .create(fx.identity.id, ClientInfo::default(), serde_json::Map::new(), None)
            .await?;

        assert_eq!(fx.service.request("Reset@Agora.test").await?, Some(fx.identity.id));
        let link = fx.notifier.links.lock().expect("lock")[0].clone();
        assert!(link.starts_with("https://agora.test/reset-password?token="));

        let outcome = fx.service.reset(token_from(&link), "brand-new-password").await?;
        assert_eq!(outcome, ResetOutcome::Completed { user_id: fx.identity.id });

        let verifier = CredentialVerifier::new(fx.durable.clone())?;
        assert!(matches!(
            verifier.verify("reset@agora.test", "brand-new-password").await?,
            LoginOutcome::Verified(_)
        ));
        assert!(matches!(
            fx.tokens.refresh(&pair.refresh.token).await?,
            RefreshOutcome::Invalid(_)
        ));
        assert!(fx.sessions.get(&session_id).await?.is_none());

        // Single use.
        let again = fx.service.reset(token_from(&link), "another-password").await?;
        assert_eq!(again, ResetOutcome::InvalidToken);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_email_issues_nothing() -> anyhow::Result<()> {
        let fx = fixture().await?;
        assert_eq!(fx.service.request("ghost@agora.test").await?, None);
        assert!(fx.notifier.links.lock().expect("lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn weak_password_keeps_token_usable() -> anyhow::Result<()> {
        let fx = fixture().await?;
        fx.service.request("reset@agora.test").await?;
        let link = fx.notifier.links.lock().expect("lock")[0].clone();

        let outcome = fx.service.reset(token_from(&link), "short").await?;
        assert!(matches!(outcome, ResetOutcome::WeakPassword(_)));
        let outcome = fx.service.reset(token_from(&link), "long-enough-now").await?;
        assert!(matches!(outcome, ResetOutcome::Completed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> anyhow::Result<()> {
        let fx = fixture().await?;
        fx.service.request("reset@agora.test").await?;
        let link = fx.notifier.links.lock().expect("lock")[0].clone();
        fx.clock.advance(chrono::Duration::seconds(3601));

        let outcome = fx.service.reset(token_from(&link), "brand-new-password").await?;
        assert_eq!(outcome, ResetOutcome::InvalidToken);
        Ok(())
    }
}
