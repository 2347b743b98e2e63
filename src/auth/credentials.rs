//! Password hashing and credential verification.
//!
//! Unknown emails still pay for one Argon2 verification against a dummy hash,
//! so response timing does not reveal which accounts exist.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

use super::error::AuthError;
use super::identity::{Identity, Status};
use crate::store::DurableStore;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Password length policy, counted in characters.
///
/// # Errors
///
/// Returns a short reason when the password is out of bounds.
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err("password is too short");
    }
    if len > MAX_PASSWORD_LEN {
        return Err("password is too long");
    }
    Ok(())
}

/// Hash a password into a PHC string (Argon2id, default parameters).
///
/// # Errors
///
/// Returns an error if randomness or hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .map_err(|err| AuthError::Random(err.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|err| AuthError::PasswordHash(err.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AuthError::PasswordHash(err.to_string()))?
        .to_string();
    Ok(phc)
}

/// Check a password against a PHC string. Unparseable hashes never verify.
#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRejection {
    /// Unknown email or wrong password; callers must not tell them apart.
    BadCredentials,
    /// Password matched but the account cannot sign in.
    Inactive(Status),
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Verified(Identity),
    Rejected(LoginRejection),
}

pub struct CredentialVerifier {
    store: Arc<dyn DurableStore>,
    dummy_hash: Arc<str>,
}

impl CredentialVerifier {
    /// # Errors
    ///
    /// Returns an error if the dummy hash cannot be computed.
    pub fn new(store: Arc<dyn DurableStore>) -> Result<Self, AuthError> {
        let dummy_hash = hash_password("agora-dummy-password")?;
        Ok(Self {
            store,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Verify an email/password pair. Argon2 runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store or the blocking pool fails.
    pub async fn verify(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = email.trim().to_lowercase();
        let record = self.store.find_credentials(&email).await?;

        let phc: Arc<str> = match &record {
            Some(record) => record.password_hash.as_str().into(),
            None => self.dummy_hash.clone(),
        };
        let password = password.to_string();
        let matched =
            tokio::task::spawn_blocking(move || verify_password(&password, &phc)).await?;

        let Some(record) = record else {
            return Ok(LoginOutcome::Rejected(LoginRejection::BadCredentials));
        };
        if !matched {
            return Ok(LoginOutcome::Rejected(LoginRejection::BadCredentials));
        }
        if !record.identity.is_active() {
            return Ok(LoginOutcome::Rejected(LoginRejection::Inactive(
                record.identity.status,
            )));
        }
        Ok(LoginOutcome::Verified(record.identity))
    }
}
