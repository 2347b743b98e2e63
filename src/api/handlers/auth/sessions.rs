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
    types::{SessionSummary, SessionsResponse},
    utils::request_context,
};
use crate::auth::AuthError;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/auth/sessions",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Live sessions of the caller", body = SessionsResponse),
        (status = 401, description = "Missing or invalid access token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let locale = Locale::from_headers(&headers);
    let ctx = request_context(&headers);
    let principal = match auth_state.gate().admit(&ctx).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection_response(&rejection, locale),
    };

    match live_sessions(&auth_state, principal.identity.id).await {
        Ok(sessions) => (
            StatusCode::OK,
            rate_limit_headers(&principal.rate_limit),
            Json(SessionsResponse { sessions }),
        )
            .into_response(),
        Err(err) => {
            error!(user_id = %principal.identity.id, "Failed to list sessions: {err}");
            internal_error(locale)
        }
    }
}

async fn live_sessions(
    auth_state: &AuthState,
    user_id: Uuid,
) -> Result<Vec<SessionSummary>, AuthError> {
    let ids = auth_state.sessions().list_active_for_user(user_id).await?;
    let mut sessions = Vec::with_capacity(ids.len());
    for id in ids {
        // Sessions can expire between the index read and this lookup.
        if let Some(data) = auth_state.sessions().get(&id).await? {
            sessions.push(SessionSummary {
                session_id: data.session_id,
                created_at: data.created_at,
                client_info: data.client_info,
            });
        }
    }
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(sessions)
}
