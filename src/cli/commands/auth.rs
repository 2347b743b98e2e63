use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SIGNING_SECRET: &str = "signing-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_RATE_LIMIT_MAX_REQUESTS: &str = "rate-limit-max-requests";
pub const ARG_LOGIN_RATE_LIMIT_MAX_REQUESTS: &str = "login-rate-limit-max-requests";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_METRICS_INTERVAL_SECONDS: &str = "metrics-interval-seconds";

#[derive(Debug, Clone)]
pub struct Options {
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

impl Options {
    /// Parse token, session and rate limit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let signing_secret = match matches.get_one::<String>(ARG_SIGNING_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_SIGNING_SECRET}"),
        };

        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "https://agora.localhost".to_string());

        Ok(Self {
            signing_secret,
            frontend_base_url,
            access_token_ttl_seconds: value_or(matches, ARG_ACCESS_TOKEN_TTL_SECONDS, 3600),
            refresh_token_ttl_seconds: value_or(matches, ARG_REFRESH_TOKEN_TTL_SECONDS, 604_800),
            session_ttl_seconds: value_or(matches, ARG_SESSION_TTL_SECONDS, 86_400),
            password_reset_ttl_seconds: value_or(matches, ARG_PASSWORD_RESET_TTL_SECONDS, 3600),
            rate_limit_window_seconds: value_or(matches, ARG_RATE_LIMIT_WINDOW_SECONDS, 60),
            rate_limit_max_requests: value_or(matches, ARG_RATE_LIMIT_MAX_REQUESTS, 100),
            login_rate_limit_max_requests: value_or(
                matches,
                ARG_LOGIN_RATE_LIMIT_MAX_REQUESTS,
                10,
            ),
            store_timeout_ms: value_or(matches, ARG_STORE_TIMEOUT_MS, 2000),
            metrics_interval_seconds: value_or(matches, ARG_METRICS_INTERVAL_SECONDS, 60),
        })
    }
}

fn value_or<T>(matches: &ArgMatches, id: &str, default: T) -> T
where
    T: Clone + Send + Sync + 'static,
{
    matches.get_one::<T>(id).cloned().unwrap_or(default)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_limit_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_SECRET)
                .long(ARG_SIGNING_SECRET)
                .help("HMAC secret used to sign access tokens (at least 32 bytes)")
                .env("AGORA_SIGNING_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for password reset links and CORS")
                .env("AGORA_FRONTEND_BASE_URL")
                .default_value("https://agora.localhost"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("AGORA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token TTL in seconds")
                .env("AGORA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session TTL in seconds")
                .env("AGORA_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Password reset token TTL in seconds")
                .env("AGORA_PASSWORD_RESET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window length in seconds")
                .env("AGORA_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX_REQUESTS)
                .long(ARG_RATE_LIMIT_MAX_REQUESTS)
                .help("Requests allowed per user and window on authenticated routes")
                .env("AGORA_RATE_LIMIT_MAX_REQUESTS")
                .default_value("100")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_RATE_LIMIT_MAX_REQUESTS)
                .long(ARG_LOGIN_RATE_LIMIT_MAX_REQUESTS)
                .help("Requests allowed per client address and window on login and reset routes")
                .env("AGORA_LOGIN_RATE_LIMIT_MAX_REQUESTS")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Deadline for a single store call in milliseconds")
                .env("AGORA_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_METRICS_INTERVAL_SECONDS)
                .long(ARG_METRICS_INTERVAL_SECONDS)
                .help("Interval between metrics snapshots and expired entry sweeps")
                .env("AGORA_METRICS_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
