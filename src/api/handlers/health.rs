use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    durable_store: String,
    volatile_store: String,
}

fn status_str(healthy: bool) -> String {
    if healthy {
        "ok".to_string()
    } else {
        "error".to_string()
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses (
        (status = 200, description = "Durable and volatile stores are reachable", body = [Health]),
        (status = 503, description = "A store is unreachable", body = [Health])
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(method: Method, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let durable_ok = match auth_state
        .durable()
        .ping()
        .instrument(info_span!("store.ping", store = "durable"))
        .await
    {
        Ok(()) => true,
        Err(error) => {
            error!("Failed to ping durable store: {}", error);
            false
        }
    };

    let volatile_ok = match auth_state
        .volatile()
        .ping()
        .instrument(info_span!("store.ping", store = "volatile"))
        .await
    {
        Ok(()) => true,
        Err(error) => {
            error!("Failed to ping volatile store: {}", error);
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        durable_store: status_str(durable_ok),
        volatile_store: status_str(volatile_ok),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if durable_ok && volatile_ok {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
