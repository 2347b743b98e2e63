//! Auth handlers and supporting modules.
//!
//! Unauthenticated endpoints (`login`, `refresh-token`, `forgot-password`,
//! `reset-password`) are rate-limited per client address. Authenticated
//! endpoints go through the request [`Gate`](crate::auth::gate::Gate), which
//! rate-limits per user id.
//!
//! Failures are answered with generic, localized messages; the reason is only
//! recorded in the audit trail.

pub mod login;
pub mod logout;
pub(crate) mod messages;
pub mod password;
pub mod refresh;
pub(crate) mod reply;
pub mod sessions;
mod state;
pub mod types;
pub(crate) mod utils;

pub use state::{AuthBackends, AuthConfig, AuthState};
