//! # Agora (identity, sessions and authorization)
//!
//! `agora` is the identity core of the Agora marketplace API. It issues and
//! rotates credentials, keeps server-side sessions, derives what each caller
//! may do and throttles abusive clients.
//!
//! ## Credentials
//!
//! A login yields a short-lived HS256 access token and a long-lived opaque
//! refresh token. Access tokens are verified without I/O. Refresh tokens are
//! stored only as SHA-256 hashes and rotate on every use; a token can be
//! redeemed exactly once, even under concurrent attempts.
//!
//! ## Sessions
//!
//! Sessions live in the volatile store with a TTL and are indexed per user so
//! that "log out everywhere" and password resets can remove them all.
//!
//! ## Authorization
//!
//! Abilities are derived from the caller's role and linked profiles
//! (administrator, client, supplier). Conditional rules match on resource
//! ownership; a missing resource instance means "is this allowed on some
//! instance".
//!
//! ## Rate limiting
//!
//! Fixed-window counters in the volatile store, keyed per user for
//! authenticated routes and per client address otherwise. A store failure
//! admits the request.

pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
