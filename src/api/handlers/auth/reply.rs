//! Mapping of gate rejections and failures to HTTP responses.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use super::messages::{Locale, Message};
use crate::auth::{gate::GateRejection, rate_limit::RateLimitStatus};

pub(crate) const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub(crate) const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Budget headers attached to every rate-limited endpoint response.
pub(crate) fn rate_limit_headers(status: &RateLimitStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers
}

pub(crate) fn rate_limited(status: &RateLimitStatus, locale: Locale) -> Response {
    let mut headers = rate_limit_headers(status);
    // Whole seconds, rounded up.
    let retry_after = status.reset_after.as_secs() + u64::from(status.reset_after.subsec_nanos() > 0);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after.max(1)));
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Message::RateLimited.text(locale),
    )
        .into_response()
}

pub(crate) fn internal_error(locale: Locale) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Message::Internal.text(locale),
    )
        .into_response()
}

pub(crate) fn rejection_response(rejection: &GateRejection, locale: Locale) -> Response {
    match rejection {
        GateRejection::Unauthenticated => {
            (StatusCode::UNAUTHORIZED, Message::Unauthorized.text(locale)).into_response()
        }
        GateRejection::RateLimited(status) => rate_limited(status, locale),
        GateRejection::Forbidden => {
            (StatusCode::FORBIDDEN, Message::Forbidden.text(locale)).into_response()
        }
        GateRejection::Unavailable => internal_error(locale),
    }
}

/// Rejection for a caller that already passed the rate limiter; the budget
/// headers go out with it.
pub(crate) fn admitted_rejection(
    rejection: &GateRejection,
    status: &RateLimitStatus,
    locale: Locale,
) -> Response {
    let mut response = rejection_response(rejection, locale);
    response.headers_mut().extend(rate_limit_headers(status));
    response
}
