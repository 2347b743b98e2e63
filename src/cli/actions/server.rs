use crate::{api, api::handlers::auth::AuthConfig, cli::telemetry};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub signing_secret: SecretString,
    pub frontend_base_url: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub session_ttl_seconds: u64,
    pub password_reset_ttl_seconds: u64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: u32,
    pub login_rate_limit_max_requests: u32,
    pub store_timeout_ms: u64,
    pub metrics_interval_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_password_reset_ttl_seconds(self.password_reset_ttl_seconds)
            .with_rate_limit_window_seconds(self.rate_limit_window_seconds)
            .with_rate_limit_max_requests(self.rate_limit_max_requests)
            .with_login_rate_limit_max_requests(self.login_rate_limit_max_requests)
            .with_store_timeout_ms(self.store_timeout_ms)
            .with_metrics_interval_seconds(self.metrics_interval_seconds)
    }
}

/// Execute the server action
/// # Errors
/// Returns an error if the server fails to start or stops with an error
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    debug!("Auth config: {:?}", auth_config);

    let result = api::new(args.port, args.dsn, auth_config, args.signing_secret).await;

    telemetry::flush();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn auth_config_carries_every_argument() {
        let args = Args {
            port: 8080,
            dsn: "postgres://localhost/agora".to_string(),
            signing_secret: SecretString::from("0123456789abcdef0123456789abcdef"),
            frontend_base_url: "https://market.agora.dev".to_string(),
            access_token_ttl_seconds: 600,
            refresh_token_ttl_seconds: 7200,
            session_ttl_seconds: 1800,
            password_reset_ttl_seconds: 300,
            rate_limit_window_seconds: 30,
            rate_limit_max_requests: 50,
            login_rate_limit_max_requests: 5,
            store_timeout_ms: 750,
            metrics_interval_seconds: 15,
        };

        let config = args.auth_config();
        assert_eq!(config.frontend_base_url(), "https://market.agora.dev");
        assert_eq!(config.access_token_ttl_seconds(), 600);
        assert_eq!(config.refresh_token_ttl_seconds(), 7200);
        assert_eq!(config.session_ttl_seconds(), 1800);
        assert_eq!(config.store_timeout(), Duration::from_millis(750));
        assert_eq!(config.api_rate_limit().max_requests, 50);
        assert_eq!(config.login_rate_limit().max_requests, 5);
        assert_eq!(config.metrics_interval(), Duration::from_secs(15));
    }
}
