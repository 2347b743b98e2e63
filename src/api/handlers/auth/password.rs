//! Forgot/reset password endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::error;

use super::{
    messages::{Locale, Message},
    reply::{internal_error, rate_limit_headers, rate_limited},
    state::AuthState,
    types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest},
    utils::{extract_client_ip, normalize_email, valid_email},
};
use crate::auth::{
    audit::{AuditEvent, AuditKind},
    rate_limit::RateLimitScope,
    reset::ResetOutcome,
};

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted; identical for known and unknown emails", body = MessageResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    let decision = auth_state
        .limit_client(RateLimitScope::PasswordReset, client_ip.as_deref())
        .await;
    if !decision.is_admitted() {
        return rate_limited(&decision.status(), locale);
    }

    match auth_state.reset().request(&email).await {
        Ok(Some(user_id)) => auth_state.gate().report(
            AuditEvent::new(AuditKind::PasswordResetRequested)
                .actor(Some(user_id))
                .client_ip(client_ip.as_deref()),
        ),
        Ok(None) => {}
        // Same reply as an unknown email so failures do not reveal accounts.
        Err(err) => error!("Password reset request failed: {err}"),
    }

    (
        StatusCode::OK,
        rate_limit_headers(&decision.status()),
        Json(MessageResponse {
            message: Message::ResetRequested.text(locale).to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced; all refresh tokens and sessions revoked"),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid or expired reset token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let client_ip = extract_client_ip(&headers);
    let decision = auth_state
        .limit_client(RateLimitScope::PasswordReset, client_ip.as_deref())
        .await;
    if !decision.is_admitted() {
        return rate_limited(&decision.status(), locale);
    }

    match auth_state.reset().reset(token, &request.new_password).await {
        Ok(ResetOutcome::Completed { user_id }) => {
            auth_state.gate().report(
                AuditEvent::new(AuditKind::PasswordReset)
                    .actor(Some(user_id))
                    .client_ip(client_ip.as_deref()),
            );
            (StatusCode::NO_CONTENT, rate_limit_headers(&decision.status())).into_response()
        }
        Ok(ResetOutcome::WeakPassword(reason)) => {
            (StatusCode::BAD_REQUEST, format!("newPassword: {reason}")).into_response()
        }
        Ok(ResetOutcome::InvalidToken) => {
            auth_state.gate().report(
                AuditEvent::new(AuditKind::AuthenticationFailed)
                    .client_ip(client_ip.as_deref())
                    .detail("invalid reset token"),
            );
            (
                StatusCode::UNAUTHORIZED,
                rate_limit_headers(&decision.status()),
                Message::InvalidResetToken.text(locale),
            )
                .into_response()
        }
        Err(err) => {
            error!("Password reset failed: {err}");
            internal_error(locale)
        }
    }
}
