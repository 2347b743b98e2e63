use crate::store::StoreError;

use super::token::TokenError;

/// Infrastructure failures of the identity core.
///
/// Policy outcomes (bad credentials, reused refresh tokens, denied abilities)
/// are returned as values by each component and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("token signing failed: {0}")]
    Signing(#[from] TokenError),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("random source failed: {0}")]
    Random(String),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
