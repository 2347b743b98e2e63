//! Opaque token generation and hashing.
//!
//! Raw tokens are only ever returned to the client; stores see the hash.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::error::AuthError;

const TOKEN_BYTES: usize = 32;

/// Create a new unguessable URL-safe token (refresh tokens, session ids, reset tokens).
pub fn generate_opaque_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Random(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a token for storage and lookups.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_32_bytes_and_unique() -> Result<(), AuthError> {
        let first = generate_opaque_token()?;
        let second = generate_opaque_token()?;
        assert_ne!(first, second);
        let decoded = Base64UrlUnpadded::decode_vec(&first).map(|bytes| bytes.len());
        assert_eq!(decoded.ok(), Some(TOKEN_BYTES));
        Ok(())
    }

    #[test]
    fn hash_token_is_stable() {
        assert_eq!(hash_token("token"), hash_token("token"));
        assert_ne!(hash_token("token"), hash_token("other"));
        assert!(!hash_token("token").contains("token"));
    }
}
