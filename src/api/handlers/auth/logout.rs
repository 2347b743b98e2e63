//! Logout endpoints. Both require a valid access token and only touch
//! credentials owned by the caller.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::error;

use super::{
    messages::Locale,
    reply::{internal_error, rate_limit_headers, rejection_response},
    state::AuthState,
    types::{LogoutAllResponse, LogoutRequest, LogoutResponse},
    utils::request_context,
};
use crate::auth::{
    audit::{AuditEvent, AuditKind},
    gate::Principal,
    AuthError,
};

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Named refresh token revoked and session deleted", body = LogoutResponse),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let ctx = request_context(&headers);
    let principal = match auth_state.gate().admit(&ctx).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection_response(&rejection, locale),
    };
    let request = payload.map(|Json(payload)| payload).unwrap_or_default();

    let response = match revoke_named(&auth_state, &principal, &request).await {
        Ok(response) => response,
        Err(err) => {
            error!(user_id = %principal.identity.id, "Logout failed: {err}");
            return internal_error(locale);
        }
    };

    auth_state.gate().report(
        AuditEvent::new(AuditKind::LoggedOut)
            .actor(Some(principal.identity.id))
            .client_ip(ctx.client_ip.as_deref()),
    );

    (
        StatusCode::OK,
        rate_limit_headers(&principal.rate_limit),
        Json(response),
    )
        .into_response()
}

async fn revoke_named(
    auth_state: &AuthState,
    principal: &Principal,
    request: &LogoutRequest,
) -> Result<LogoutResponse, AuthError> {
    let owner = principal.identity.id;

    let refresh_token_revoked = match non_empty(request.refresh_token.as_deref()) {
        Some(token) => auth_state.tokens().revoke(token, Some(owner)).await?,
        None => false,
    };

    let session_deleted = match non_empty(request.session_id.as_deref()) {
        Some(session_id) => match auth_state.sessions().get(session_id).await? {
            Some(session) if session.user_id == owner => {
                auth_state.sessions().delete(session_id).await?
            }
            _ => false,
        },
        None => false,
    };

    Ok(LogoutResponse {
        refresh_token_revoked,
        session_deleted,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path = "/auth/logout-all",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Every refresh token and session of the caller revoked", body = LogoutAllResponse),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn logout_all(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let ctx = request_context(&headers);
    let principal = match auth_state.gate().admit(&ctx).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection_response(&rejection, locale),
    };
    let user_id = principal.identity.id;

    let refresh_tokens_revoked = match auth_state.tokens().revoke_all(user_id).await {
        Ok(count) => count,
        Err(err) => {
            error!(user_id = %user_id, "Failed to revoke refresh tokens: {err}");
            return internal_error(locale);
        }
    };
    let sessions_deleted = match auth_state.sessions().delete_all_for_user(user_id).await {
        Ok(count) => count,
        Err(err) => {
            error!(user_id = %user_id, "Failed to delete sessions: {err}");
            return internal_error(locale);
        }
    };

    auth_state.gate().report(
        AuditEvent::new(AuditKind::LoggedOutEverywhere)
            .actor(Some(user_id))
            .client_ip(ctx.client_ip.as_deref())
            .detail(format!(
                "{refresh_tokens_revoked} refresh tokens, {sessions_deleted} sessions"
            )),
    );

    (
        StatusCode::OK,
        rate_limit_headers(&principal.rate_limit),
        Json(LogoutAllResponse {
            refresh_tokens_revoked,
            sessions_deleted,
        }),
    )
        .into_response()
}
