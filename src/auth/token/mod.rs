//! Token issuance, verification, rotation and revocation.
//!
//! Flow Overview:
//! 1) Login issues a pair: a short-lived HS256 access token and an opaque
//!    refresh token. The refresh token hash is written to the durable store
//!    first, then mirrored into the volatile store for fast lookups.
//! 2) Refresh resolves the presented token (volatile mirror, then durable),
//!    consumes it with a conditional durable delete and issues a new pair.
//!    Exactly one concurrent caller wins the delete; everyone else sees
//!    `Invalid`.
//! 3) Revocation deletes durable rows first and mirrors second, so a stale
//!    mirror can never resurrect a revoked token.
//!
//! Security boundary: raw refresh tokens are never stored, only their hash.

pub mod access;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

pub use access::{AccessClaims, AccessTokenSigner, TokenError};

use super::error::AuthError;
use super::identity::{Identity, Role};
use super::secret::{generate_opaque_token, hash_token};
use crate::clock::Clock;
use crate::store::{keys, positive_duration, DurableStore, RefreshTokenRecord, VolatileStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Why a refresh attempt did not produce a new pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRejection {
    Unknown,
    Expired,
    InactiveSubject,
    AlreadyConsumed,
}

impl RefreshRejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Expired => "expired",
            Self::InactiveSubject => "inactive_subject",
            Self::AlreadyConsumed => "already_consumed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Rotated { identity: Identity, pair: TokenPair },
    Invalid(RefreshRejection),
}

/// Value kept under `refresh:{hash}` in the volatile store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshMirror {
    sub: Uuid,
    exp: DateTime<Utc>,
}

pub struct TokenService {
    signer: AccessTokenSigner,
    durable: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(
        signer: AccessTokenSigner,
        durable: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            durable,
            volatile,
            clock,
            access_ttl: chrono::Duration::hours(1),
            refresh_ttl: chrono::Duration::days(7),
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn access_ttl(&self) -> chrono::Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> chrono::Duration {
        self.refresh_ttl
    }

    /// Sign an access token for the subject. Pure apart from the clock read.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_access_token(&self, subject_id: Uuid, role: Role) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: subject_id,
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        Ok(IssuedToken {
            token: self.signer.sign(&claims)?,
            expires_at,
        })
    }

    /// Create and persist a refresh token.
    ///
    /// The durable write must succeed; the volatile mirror is best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error if randomness or the durable store fails.
    pub async fn issue_refresh_token(&self, subject_id: Uuid) -> Result<IssuedToken, AuthError> {
        let token = generate_opaque_token()?;
        let token_hash = hash_token(&token);
        let expires_at = self.clock.now() + self.refresh_ttl;

        self.durable
            .insert_refresh_token(&RefreshTokenRecord {
                token_hash: token_hash.clone(),
                subject_id,
                expires_at,
            })
            .await?;

        self.write_mirror(&token_hash, subject_id, expires_at).await;

        Ok(IssuedToken { token, expires_at })
    }

    /// # Errors
    ///
    /// Returns an error if either token cannot be issued.
    pub async fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let access = self.issue_access_token(identity.id, identity.role)?;
        let refresh = self.issue_refresh_token(identity.id).await?;
        Ok(TokenPair { access, refresh })
    }

    /// Validate an access token without touching any store.
    ///
    /// # Errors
    ///
    /// Returns an error for any malformed, forged or expired token.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.signer.verify(token, self.clock.now().timestamp())
    }

    /// Rotate a refresh token. The presented token is single use.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures; every policy
    /// rejection is reported as [`RefreshOutcome::Invalid`].
    pub async fn refresh(&self, presented: &str) -> Result<RefreshOutcome, AuthError> {
        let token_hash = hash_token(presented);
        let mirror_key = keys::refresh_token(&token_hash);

        let Some((subject_id, expires_at)) = self.lookup(&token_hash, &mirror_key).await? else {
            return Ok(RefreshOutcome::Invalid(RefreshRejection::Unknown));
        };

        if expires_at <= self.clock.now() {
            self.durable.delete_refresh_token(&token_hash).await?;
            self.delete_mirror(&mirror_key).await;
            return Ok(RefreshOutcome::Invalid(RefreshRejection::Expired));
        }

        let identity = match self.durable.find_identity(subject_id).await? {
            Some(identity) if identity.is_active() => identity,
            _ => return Ok(RefreshOutcome::Invalid(RefreshRejection::InactiveSubject)),
        };

        // The durable delete decides the race between concurrent refreshes.
        if !self.durable.delete_refresh_token(&token_hash).await? {
            self.delete_mirror(&mirror_key).await;
            return Ok(RefreshOutcome::Invalid(RefreshRejection::AlreadyConsumed));
        }
        self.delete_mirror(&mirror_key).await;

        match self.issue_pair(&identity).await {
            Ok(pair) => Ok(RefreshOutcome::Rotated { identity, pair }),
            Err(err) => {
                error!(
                    user_id = %identity.id,
                    "Refresh token consumed but replacement issuance failed; session lost: {err}"
                );
                Err(err)
            }
        }
    }

    /// Revoke a single refresh token. When `owner` is given, tokens of other
    /// subjects are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable store fails.
    pub async fn revoke(&self, presented: &str, owner: Option<Uuid>) -> Result<bool, AuthError> {
        let token_hash = hash_token(presented);
        let Some(record) = self.durable.find_refresh_token(&token_hash).await? else {
            return Ok(false);
        };
        if owner.is_some_and(|owner| owner != record.subject_id) {
            warn!(
                owner = ?owner,
                "Refusing to revoke a refresh token owned by another subject"
            );
            return Ok(false);
        }
        let deleted = self.durable.delete_refresh_token(&token_hash).await?;
        self.delete_mirror(&keys::refresh_token(&token_hash)).await;
        Ok(deleted)
    }

    /// Revoke every refresh token of a subject; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable store fails. Mirror cleanup failures
    /// are logged only.
    pub async fn revoke_all(&self, subject_id: Uuid) -> Result<usize, AuthError> {
        let hashes = self.durable.delete_refresh_tokens_for(subject_id).await?;
        for token_hash in &hashes {
            self.delete_mirror(&keys::refresh_token(token_hash)).await;
        }
        Ok(hashes.len())
    }

    async fn lookup(
        &self,
        token_hash: &str,
        mirror_key: &str,
    ) -> Result<Option<(Uuid, DateTime<Utc>)>, AuthError> {
        match self.volatile.get(mirror_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<RefreshMirror>(&raw) {
                Ok(mirror) => return Ok(Some((mirror.sub, mirror.exp))),
                Err(err) => warn!("Ignoring unreadable refresh token mirror: {err}"),
            },
            Ok(None) => {}
            Err(err) => warn!("Refresh token mirror lookup failed, using durable store: {err}"),
        }

        Ok(self
            .durable
            .find_refresh_token(token_hash)
            .await?
            .map(|record| (record.subject_id, record.expires_at)))
    }

    async fn write_mirror(&self, token_hash: &str, subject_id: Uuid, expires_at: DateTime<Utc>) {
        let mirror = RefreshMirror {
            sub: subject_id,
            exp: expires_at,
        };
        let value = match serde_json::to_string(&mirror) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to encode refresh token mirror: {err}");
                return;
            }
        };
        let ttl = positive_duration(expires_at - self.clock.now());
        if let Err(err) = self
            .volatile
            .set(&keys::refresh_token(token_hash), &value, Some(ttl))
            .await
        {
            warn!(user_id = %subject_id, "Failed to mirror refresh token: {err}");
        }
    }

    async fn delete_mirror(&self, mirror_key: &str) {
        if let Err(err) = self.volatile.delete(mirror_key).await {
            warn!("Failed to delete refresh token mirror: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{LinkedProfiles, Status};
    use crate::clock::ManualClock;
    use crate::store::{MemoryDurableStore, MemoryVolatileStore};
    use anyhow::Result;
    use chrono::TimeZone;
    use secrecy::SecretString;

    struct Fixture {
        service: Arc<TokenService>,
        durable: Arc<MemoryDurableStore>,
        volatile: Arc<MemoryVolatileStore>,
        clock: Arc<ManualClock>,
        identity: Identity,
    }

    fn identity(status: Status) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "client@agora.test".to_string(),
            role: Role::Client,
            status,
            profiles: LinkedProfiles::default(),
        }
    }

    async fn fixture(status: Status) -> Result<Fixture> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date"),
        ));
        let durable = Arc::new(MemoryDurableStore::new());
        let volatile = Arc::new(MemoryVolatileStore::new(clock.clone()));
        let identity = identity(status);
        durable.insert_identity(identity.clone(), "hash".to_string()).await;
        let signer = AccessTokenSigner::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))?;
        let service = Arc::new(TokenService::new(
            signer,
            durable.clone(),
            volatile.clone(),
            clock.clone(),
        ));
        Ok(Fixture {
            service,
            durable,
            volatile,
            clock,
            identity,
        })
    }

    #[tokio::test]
    async fn access_token_round_trips_through_verify() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let issued = fx.service.issue_access_token(fx.identity.id, Role::Client)?;
        let claims = fx.service.verify_access_token(&issued.token)?;
        assert_eq!(claims.sub, fx.identity.id);
        assert_eq!(claims.exp - claims.iat, 3600);

        fx.clock.advance(chrono::Duration::seconds(3600));
        assert!(matches!(
            fx.service.verify_access_token(&issued.token),
            Err(TokenError::Expired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_is_single_use() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;

        let RefreshOutcome::Rotated { pair: rotated, .. } =
            fx.service.refresh(&pair.refresh.token).await?
        else {
            panic!("expected rotation");
        };
        assert_ne!(rotated.refresh.token, pair.refresh.token);

        let again = fx.service.refresh(&pair.refresh.token).await?;
        assert!(matches!(again, RefreshOutcome::Invalid(_)));
        assert_eq!(fx.durable.refresh_token_count(fx.identity.id).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refresh_has_one_winner() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = fx.service.clone();
            let token = pair.refresh.token.clone();
            handles.push(tokio::spawn(async move { service.refresh(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if let RefreshOutcome::Rotated { .. } = handle.await?? {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_falls_back_to_durable_when_mirror_is_gone() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;
        let mirror_key = keys::refresh_token(&hash_token(&pair.refresh.token));
        assert!(fx.volatile.delete(&mirror_key).await?);

        let outcome = fx.service.refresh(&pair.refresh.token).await?;
        assert!(matches!(outcome, RefreshOutcome::Rotated { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn stale_mirror_cannot_resurrect_a_consumed_token() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;
        let token_hash = hash_token(&pair.refresh.token);
        assert!(fx.durable.delete_refresh_token(&token_hash).await?);

        let outcome = fx.service.refresh(&pair.refresh.token).await?;
        assert!(matches!(
            outcome,
            RefreshOutcome::Invalid(RefreshRejection::AlreadyConsumed)
        ));
        assert!(!fx.volatile.exists(&keys::refresh_token(&token_hash)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected_and_removed() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;
        fx.clock.advance(chrono::Duration::days(7));

        let outcome = fx.service.refresh(&pair.refresh.token).await?;
        assert!(matches!(
            outcome,
            RefreshOutcome::Invalid(RefreshRejection::Expired | RefreshRejection::Unknown)
        ));
        assert_eq!(fx.durable.refresh_token_count(fx.identity.id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn suspended_subject_cannot_refresh() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;
        let mut suspended = fx.identity.clone();
        suspended.status = Status::Suspended;
        fx.durable.update_identity(suspended).await;

        let outcome = fx.service.refresh(&pair.refresh.token).await?;
        assert!(matches!(
            outcome,
            RefreshOutcome::Invalid(RefreshRejection::InactiveSubject)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_invalidates_every_token() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let first = fx.service.issue_pair(&fx.identity).await?;
        let second = fx.service.issue_pair(&fx.identity).await?;

        assert_eq!(fx.service.revoke_all(fx.identity.id).await?, 2);
        for token in [first.refresh.token, second.refresh.token] {
            assert!(matches!(
                fx.service.refresh(&token).await?,
                RefreshOutcome::Invalid(_)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn revoke_respects_owner() -> Result<()> {
        let fx = fixture(Status::Active).await?;
        let pair = fx.service.issue_pair(&fx.identity).await?;

        assert!(!fx.service.revoke(&pair.refresh.token, Some(Uuid::new_v4())).await?);
        assert!(fx.service.revoke(&pair.refresh.token, Some(fx.identity.id)).await?);
        assert!(!fx.service.revoke(&pair.refresh.token, None).await?);
        Ok(())
    }
}
