//! Authenticated self-service endpoint.
//!
//! Flow Overview:
//! 1) Admit the caller through the gate (token, rate limit, fresh identity).
//! 2) Authorize `read` on the caller's own user record.
//! 3) Return the identity summary and the abilities derived for it.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use super::auth::{
    messages::Locale,
    reply::{admitted_rejection, rate_limit_headers, rejection_response},
    utils::request_context,
    AuthState,
};
use crate::auth::{
    ability::{Action, Resource, ResourceType, RuleSet},
    identity::IdentitySummary,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub identity: IdentitySummary,
    pub abilities: RuleSet,
}

#[utoipa::path(
    get,
    path = "/me",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The caller's identity and abilities.", body = MeResponse),
        (status = 401, description = "Missing or invalid access token.", body = String),
        (status = 403, description = "Not allowed.", body = String),
        (status = 429, description = "Rate limited.", body = String),
    ),
    tag = "me"
)]
pub async fn get_me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let ctx = request_context(&headers);
    let gate = auth_state.gate();

    let principal = match gate.admit(&ctx).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection_response(&rejection, locale),
    };
    let own = Resource::User {
        id: principal.identity.id,
    };
    if let Err(rejection) = gate.authorize(
        &ctx,
        &principal,
        Action::Read,
        ResourceType::User,
        Some(&own),
    ) {
        return admitted_rejection(&rejection, &principal.rate_limit, locale);
    }

    let headers = rate_limit_headers(&principal.rate_limit);
    let response = MeResponse {
        identity: principal.identity.summary(),
        abilities: principal.abilities,
    };
    (StatusCode::OK, headers, Json(response)).into_response()
}
