//! Map validated command-line matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        signing_secret: auth_opts.signing_secret,
        frontend_base_url: auth_opts.frontend_base_url,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        password_reset_ttl_seconds: auth_opts.password_reset_ttl_seconds,
        rate_limit_window_seconds: auth_opts.rate_limit_window_seconds,
        rate_limit_max_requests: auth_opts.rate_limit_max_requests,
        login_rate_limit_max_requests: auth_opts.login_rate_limit_max_requests,
        store_timeout_ms: auth_opts.store_timeout_ms,
        metrics_interval_seconds: auth_opts.metrics_interval_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn builds_server_action_from_env() {
        temp_env::with_vars(
            [
                ("AGORA_DSN", Some("postgres://agora@localhost:5432/agora")),
                (
                    "AGORA_SIGNING_SECRET",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                ("AGORA_SESSION_TTL_SECONDS", Some("900")),
                ("AGORA_PORT", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["agora"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, "postgres://agora@localhost:5432/agora");
                    assert_eq!(args.session_ttl_seconds, 900);
                    assert_eq!(
                        args.signing_secret.expose_secret(),
                        "0123456789abcdef0123456789abcdef"
                    );
                }
            },
        );
    }

    #[test]
    fn blank_signing_secret_is_rejected() {
        temp_env::with_vars(
            [
                ("AGORA_DSN", Some("postgres://agora@localhost:5432/agora")),
                ("AGORA_SIGNING_SECRET", Some("  ")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["agora"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err
                        .to_string()
                        .contains("missing required argument: --signing-secret"));
                }
            },
        );
    }
}
