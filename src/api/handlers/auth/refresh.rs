//! Refresh-token rotation endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    messages::{Locale, Message},
    reply::{internal_error, rate_limit_headers, rate_limited},
    state::AuthState,
    types::{RefreshTokenRequest, RefreshTokenResponse, TOKEN_TYPE},
    utils::extract_client_ip,
};
use crate::auth::{
    audit::{AuditEvent, AuditKind},
    rate_limit::RateLimitScope,
    token::RefreshOutcome,
};

#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair; the presented token is consumed", body = RefreshTokenResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid, expired or reused refresh token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let request: RefreshTokenRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let presented = request.refresh_token.trim();
    if presented.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing refresh token".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    let decision = auth_state
        .limit_client(RateLimitScope::Refresh, client_ip.as_deref())
        .await;
    if !decision.is_admitted() {
        return rate_limited(&decision.status(), locale);
    }

    match auth_state.tokens().refresh(presented).await {
        Ok(RefreshOutcome::Rotated { identity, pair }) => {
            auth_state.metrics().refreshed();
            auth_state.gate().report(
                AuditEvent::new(AuditKind::TokenRefreshed)
                    .actor(Some(identity.id))
                    .client_ip(client_ip.as_deref()),
            );
            let response = RefreshTokenResponse {
                access_token: pair.access.token,
                refresh_token: pair.refresh.token,
                token_type: TOKEN_TYPE.to_string(),
                expires_in: auth_state.config().access_token_ttl_seconds(),
            };
            (
                StatusCode::OK,
                rate_limit_headers(&decision.status()),
                Json(response),
            )
                .into_response()
        }
        Ok(RefreshOutcome::Invalid(reason)) => {
            warn!(reason = reason.as_str(), "Refresh token rejected");
            auth_state.metrics().refresh_rejected();
            auth_state.gate().report(
                AuditEvent::new(AuditKind::RefreshRejected)
                    .client_ip(client_ip.as_deref())
                    .detail(reason.as_str()),
            );
            (
                StatusCode::UNAUTHORIZED,
                rate_limit_headers(&decision.status()),
                Message::InvalidRefreshToken.text(locale),
            )
                .into_response()
        }
        Err(err) => {
            error!("Refresh failed: {err}");
            internal_error(locale)
        }
    }
}
