//! Identity, session and authorization core.
//!
//! - `token`: access token signing and refresh token rotation.
//! - `session`: server-side sessions with per-user indexes.
//! - `ability`: role and attribute based permissions.
//! - `rate_limit`: fixed-window counters.
//! - `gate`: the request pipeline combining all of the above.

pub mod ability;
pub mod audit;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod identity;
pub mod metrics;
pub mod rate_limit;
pub mod reset;
pub mod secret;
pub mod session;
pub mod token;

pub use error::AuthError;
