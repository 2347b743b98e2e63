//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{identity::IdentitySummary, session::ClientInfo};

pub(crate) const TOKEN_TYPE: &str = "Bearer";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub identity: IdentitySummary,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub refresh_token_revoked: bool,
    pub session_deleted: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutAllResponse {
    pub refresh_tokens_revoked: usize,
    pub sessions_deleted: usize,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub client_info: ClientInfo,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn refresh_request_uses_camel_case() -> Result<()> {
        let request: RefreshTokenRequest =
            serde_json::from_str(r#"{"refreshToken":"opaque-value"}"#)?;
        assert_eq!(request.refresh_token, "opaque-value");
        Ok(())
    }

    #[test]
    fn logout_request_fields_are_optional() -> Result<()> {
        let request: LogoutRequest = serde_json::from_str("{}")?;
        assert!(request.refresh_token.is_none());
        assert!(request.session_id.is_none());

        let request: LogoutRequest = serde_json::from_str(r#"{"sessionId":"abc"}"#)?;
        assert_eq!(request.session_id.as_deref(), Some("abc"));
        Ok(())
    }

    #[test]
    fn reset_request_reads_new_password() -> Result<()> {
        let value = serde_json::json!({"token": "t", "newPassword": "correct horse"});
        let request: ResetPasswordRequest = serde_json::from_value(value)?;
        assert_eq!(request.new_password, "correct horse");

        let response = serde_json::to_value(LogoutAllResponse {
            refresh_tokens_revoked: 2,
            sessions_deleted: 1,
        })?;
        let revoked = response
            .get("refreshTokensRevoked")
            .and_then(serde_json::Value::as_u64)
            .context("missing refreshTokensRevoked")?;
        assert_eq!(revoked, 2);
        Ok(())
    }
}
