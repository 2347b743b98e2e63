//! Security audit events.
//!
//! Every authentication failure, authorization denial and rate-limit rejection
//! produces an [`AuditEvent`]. The default sink writes structured records to
//! the `audit` tracing target so they can be routed separately from
//! application logs.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use super::ability::{Action, ResourceType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    LoginSucceeded,
    LoginFailed,
    AuthenticationFailed,
    AuthorizationDenied,
    RateLimited,
    TokenRefreshed,
    RefreshRejected,
    LoggedOut,
    LoggedOutEverywhere,
    PasswordResetRequested,
    PasswordReset,
}

impl AuditKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSucceeded => "login_succeeded",
            Self::LoginFailed => "login_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationDenied => "authorization_denied",
            Self::RateLimited => "rate_limited",
            Self::TokenRefreshed => "token_refreshed",
            Self::RefreshRejected => "refresh_rejected",
            Self::LoggedOut => "logged_out",
            Self::LoggedOutEverywhere => "logged_out_everywhere",
            Self::PasswordResetRequested => "password_reset_requested",
            Self::PasswordReset => "password_reset",
        }
    }

    /// Failures and denials; logged at warn level.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::LoginFailed
                | Self::AuthenticationFailed
                | Self::AuthorizationDenied
                | Self::RateLimited
                | Self::RefreshRejected
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    /// `None` when the caller could not be identified.
    pub actor: Option<Uuid>,
    pub action: Option<Action>,
    pub resource_type: Option<ResourceType>,
    pub client_ip: Option<String>,
    pub detail: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            actor: None,
            action: None,
            resource_type: None,
            client_ip: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: Option<Uuid>) -> Self {
        self.actor = actor;
        self
    }

    #[must_use]
    pub fn target(mut self, action: Action, resource_type: ResourceType) -> Self {
        self.action = Some(action);
        self.resource_type = Some(resource_type);
        self
    }

    #[must_use]
    pub fn client_ip(mut self, client_ip: Option<&str>) -> Self {
        self.client_ip = client_ip.map(str::to_string);
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit events. Recording must not fail the request.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Writes events to the `audit` tracing target.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let actor = event
            .actor
            .map_or_else(|| "unknown".to_string(), |id| id.to_string());
        let action = event.action.map_or("-", Action::as_str);
        let resource_type = event.resource_type.map_or("-", ResourceType::as_str);
        let client_ip = event.client_ip.as_deref().unwrap_or("unknown");
        let detail = event.detail.as_deref().unwrap_or("");

        if event.kind.is_failure() {
            warn!(
                target: "audit",
                kind = event.kind.as_str(),
                actor = %actor,
                action,
                resource_type,
                client_ip,
                detail,
                "security event"
            );
        } else {
            info!(
                target: "audit",
                kind = event.kind.as_str(),
                actor = %actor,
                action,
                resource_type,
                client_ip,
                detail,
                "security event"
            );
        }
    }
}

/// Keeps events in memory; used by tests to assert on what was reported.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn count(&self, kind: AuditKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
