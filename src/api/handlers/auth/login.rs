//! Password login endpoint.

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
    types::{LoginRequest, LoginResponse, TOKEN_TYPE},
    utils::{client_info, extract_client_ip, normalize_email, valid_email},
};
use crate::auth::{
    audit::{AuditEvent, AuditKind},
    credentials::{LoginOutcome, LoginRejection},
    rate_limit::RateLimitScope,
};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login success", body = LoginResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Bad credentials or inactive account", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing password".to_string()).into_response();
    }

    // Rate-limit before hashing to keep abuse cheap to reject.
    let client_ip = extract_client_ip(&headers);
    let decision = auth_state
        .limit_client(RateLimitScope::Login, client_ip.as_deref())
        .await;
    if !decision.is_admitted() {
        return rate_limited(&decision.status(), locale);
    }

    let identity = match auth_state
        .credentials()
        .verify(&email, &request.password)
        .await
    {
        Ok(LoginOutcome::Verified(identity)) => identity,
        Ok(LoginOutcome::Rejected(rejection)) => {
            let detail = match rejection {
                LoginRejection::BadCredentials => "bad credentials".to_string(),
                LoginRejection::Inactive(status) => format!("account {}", status.as_str()),
            };
            auth_state.metrics().login_failed();
            auth_state.gate().report(
                AuditEvent::new(AuditKind::LoginFailed)
                    .client_ip(client_ip.as_deref())
                    .detail(detail),
            );
            return (
                StatusCode::UNAUTHORIZED,
                rate_limit_headers(&decision.status()),
                Message::InvalidCredentials.text(locale),
            )
                .into_response();
        }
        Err(err) => {
            error!("Credential verification failed: {err}");
            return internal_error(locale);
        }
    };

    let pair = match auth_state.tokens().issue_pair(&identity).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(user_id = %identity.id, "Failed to issue tokens: {err}");
            return internal_error(locale);
        }
    };

    let session_id = match auth_state
        .sessions()
        .create(
            identity.id,
            client_info(&headers),
            serde_json::Map::new(),
            None,
        )
        .await
    {
        Ok(session_id) => session_id,
        Err(err) => {
            error!(user_id = %identity.id, "Failed to create session: {err}");
            // The refresh token is useless to the client without a response.
            if let Err(err) = auth_state
                .tokens()
                .revoke(&pair.refresh.token, Some(identity.id))
                .await
            {
                error!(user_id = %identity.id, "Failed to revoke orphaned refresh token: {err}");
            }
            return internal_error(locale);
        }
    };

    auth_state.metrics().login_succeeded();
    auth_state.gate().report(
        AuditEvent::new(AuditKind::LoginSucceeded)
            .actor(Some(identity.id))
            .client_ip(client_ip.as_deref()),
    );

    let response = LoginResponse {
        access_token: pair.access.token,
        refresh_token: pair.refresh.token,
        session_id,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: auth_state.config().access_token_ttl_seconds(),
        identity: identity.summary(),
    };

    (
        StatusCode::OK,
        rate_limit_headers(&decision.status()),
        Json(response),
    )
        .into_response()
}
