use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::identity::Role;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";

/// Shortest signing secret accepted, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AccessTokenHeader {
    alg: String,
    typ: String,
}

impl AccessTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("signing secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    WeakSecret(usize),
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// HS256 signer/verifier holding the shared secret.
pub struct AccessTokenSigner {
    secret: SecretSlice<u8>,
}

impl std::fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenSigner").finish_non_exhaustive()
    }
}

impl AccessTokenSigner {
    /// # Errors
    ///
    /// Returns [`TokenError::WeakSecret`] when the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes().to_vec();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret(bytes.len()));
        }
        Ok(Self {
            secret: SecretSlice::from(bytes),
        })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret())
            .map_err(|_| TokenError::WeakSecret(self.secret.expose_secret().len()))
    }

    /// Encode and sign the claims. Deterministic for identical claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded.
    pub fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        let header_b64 = b64e_json(&AccessTokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Check structure, signature and expiry; no I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, was not signed with this
    /// secret, or `exp` is not after `now_unix_seconds`.
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<AccessClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::TokenFormat);
        }

        let header: AccessTokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: AccessClaims = b64d_json(claims_b64)?;
        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secret: &str) -> AccessTokenSigner {
        AccessTokenSigner::new(&SecretString::from(secret.to_string())).expect("signer")
    }

    fn claims(exp: i64) -> AccessClaims {
        AccessClaims {
            sub: Uuid::nil(),
            role: Role::Client,
            iat: 1_000,
            exp,
        }
    }

    #[test]
    fn sign_and_verify() {
        let signer = signer("0123456789abcdef0123456789abcdef");
        let token = signer.sign(&claims(2_000)).expect("sign");
        assert_eq!(token.split('.').count(), 3);
        let decoded = signer.verify(&token, 1_500).expect("verify");
        assert_eq!(decoded, claims(2_000));
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = signer("0123456789abcdef0123456789abcdef");
        let first = signer.sign(&claims(2_000)).expect("sign");
        let second = signer.sign(&claims(2_000)).expect("sign");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_expired_at_boundary() {
        let signer = signer("0123456789abcdef0123456789abcdef");
        let token = signer.sign(&claims(2_000)).expect("sign");
        assert!(matches!(signer.verify(&token, 2_000), Err(TokenError::Expired)));
        assert!(signer.verify(&token, 1_999).is_ok());
    }

    #[test]
    fn rejects_foreign_signature() {
        let ours = signer("0123456789abcdef0123456789abcdef");
        let theirs = signer("fedcba9876543210fedcba9876543210");
        let token = theirs.sign(&claims(2_000)).expect("sign");
        assert!(matches!(
            ours.verify(&token, 1_500),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_tampered_claims() {
        let signer = signer("0123456789abcdef0123456789abcdef");
        let token = signer.sign(&claims(2_000)).expect("sign");
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64e_json(&AccessClaims {
            role: Role::Admin,
            ..claims(2_000)
        })
        .expect("encode");
        parts[1] = &forged;
        assert!(matches!(
            signer.verify(&parts.join("."), 1_500),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_malformed() {
        let signer = signer("0123456789abcdef0123456789abcdef");
        assert!(matches!(signer.verify("abc", 0), Err(TokenError::TokenFormat)));
        assert!(matches!(
            signer.verify("a.b.c.d", 0),
            Err(TokenError::TokenFormat)
        ));
        assert!(signer.verify("!!.??.##", 0).is_err());
    }

    #[test]
    fn rejects_short_secret() {
        let result = AccessTokenSigner::new(&SecretString::from("short".to_string()));
        assert!(matches!(result, Err(TokenError::WeakSecret(5))));
    }
}
