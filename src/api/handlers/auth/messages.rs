//! Localized client-facing messages for auth failures.

use axum::http::{header::ACCEPT_LANGUAGE, HeaderMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Locale {
    En,
    PtBr,
}

impl Locale {
    /// Pick the first supported language from `Accept-Language`; English otherwise.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok())
        else {
            return Self::En;
        };
        for tag in value.split(',') {
            let tag = tag.split(';').next().unwrap_or_default().trim().to_lowercase();
            if tag == "pt" || tag.starts_with("pt-") {
                return Self::PtBr;
            }
            if tag == "en" || tag.starts_with("en-") {
                return Self::En;
            }
        }
        Self::En
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Message {
    InvalidCredentials,
    Unauthorized,
    Forbidden,
    RateLimited,
    InvalidRefreshToken,
    InvalidResetToken,
    ResetRequested,
    Internal,
}

impl Message {
    pub(crate) fn text(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::InvalidCredentials, Locale::En) => "Invalid email or password",
            (Self::InvalidCredentials, Locale::PtBr) => "E-mail ou senha inválidos",
            (Self::Unauthorized, Locale::En) => "Authentication required",
            (Self::Unauthorized, Locale::PtBr) => "Autenticação necessária",
            (Self::Forbidden, Locale::En) => "You do not have permission to perform this action",
            (Self::Forbidden, Locale::PtBr) => "Você não tem permissão para realizar esta ação",
            (Self::RateLimited, Locale::En) => "Too many requests, try again later",
            (Self::RateLimited, Locale::PtBr) => "Muitas requisições, tente novamente mais tarde",
            (Self::InvalidRefreshToken, Locale::En) => "Invalid or expired refresh token",
            (Self::InvalidRefreshToken, Locale::PtBr) => "Refresh token inválido ou expirado",
            (Self::InvalidResetToken, Locale::En) => "Invalid or expired reset token",
            (Self::InvalidResetToken, Locale::PtBr) => "Token de redefinição inválido ou expirado",
            (Self::ResetRequested, Locale::En) => {
                "If the account exists, a reset link has been sent"
            }
            (Self::ResetRequested, Locale::PtBr) => {
                "Se a conta existir, um link de redefinição foi enviado"
            }
            (Self::Internal, Locale::En) => "Internal server error",
            (Self::Internal, Locale::PtBr) => "Erro interno do servidor",
        }
    }
}
