use crate::{
    api::handlers::{
        auth::{
            reply::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING},
            AuthBackends, AuthConfig, AuthState,
        },
        health,
    },
    auth::{
        audit::TracingAuditSink, metrics::spawn_metrics_collector, reset::LogResetNotifier,
        token::AccessTokenSigner,
    },
    clock::SystemClock,
    store::{
        BoundedDurableStore, BoundedVolatileStore, DurableStore, PgDurableStore, PgVolatileStore,
        VolatileStore,
    },
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::options,
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The full application: documented routes, Swagger UI at `/docs` and the
/// shared layers (request id, tracing, CORS, state).
///
/// # Errors
///
/// Returns an error if the frontend base URL cannot be turned into an origin.
pub fn app(auth_state: Arc<AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT_LANGUAGE])
        .expose_headers([
            HeaderName::from_static(RATE_LIMIT_LIMIT),
            HeaderName::from_static(RATE_LIMIT_REMAINING),
            RETRY_AFTER,
            HeaderName::from_static("x-request-id"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(health::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        );

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    signing_secret: SecretString,
) -> Result<()> {
    // Fail before touching the network if the key is unusable.
    let signer = AccessTokenSigner::new(&signing_secret).context("Invalid signing secret")?;

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .context("Failed to apply database schema")?;

    let store_timeout = auth_config.store_timeout();
    let durable: Arc<dyn DurableStore> = Arc::new(BoundedDurableStore::new(
        Arc::new(PgDurableStore::new(pool.clone())),
        store_timeout,
    ));
    let volatile: Arc<dyn VolatileStore> = Arc::new(BoundedVolatileStore::new(
        Arc::new(PgVolatileStore::new(pool)),
        store_timeout,
    ));

    let auth_state = Arc::new(
        AuthState::new(
            auth_config,
            signer,
            AuthBackends {
                durable,
                volatile,
                clock: Arc::new(SystemClock),
                notifier: Arc::new(LogResetNotifier),
                audit: Arc::new(TracingAuditSink),
            },
        )
        .context("Failed to initialize auth services")?,
    );

    // The collector logs counters and purges expired volatile entries until
    // the server stops.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = spawn_metrics_collector(
        auth_state.metrics().clone(),
        auth_state.volatile().clone(),
        auth_state.config().metrics_interval(),
        shutdown_rx,
    );

    let app = app(auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if shutdown_tx.send(true).is_err() {
        warn!("Metrics collector already stopped");
    }
    if let Err(err) = collector.await {
        warn!("Metrics collector task failed: {err}");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() -> Result<()> {
        assert_eq!(
            frontend_origin("https://agora.localhost/app/")?,
            HeaderValue::from_static("https://agora.localhost")
        );
        assert_eq!(
            frontend_origin("http://localhost:5173")?,
            HeaderValue::from_static("http://localhost:5173")
        );
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }
}
