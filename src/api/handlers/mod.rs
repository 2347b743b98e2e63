//! API handlers for Agora.

pub mod auth;
pub mod health;
pub mod me;
