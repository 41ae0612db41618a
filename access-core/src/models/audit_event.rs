//! Audit event model - security and compliance logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit actions emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AccessGranted,
    AccessDenied,
    RoleAssigned,
    RoleRevoked,
    PrincipalRegistered,
    LoginSucceeded,
    LoginFailed,
    LoginBlocked,
    AccountLocked,
    SessionCreated,
    SessionEvicted,
    TokenRefreshed,
    RefreshRejected,
    InvalidTokenUsage,
    UserLogout,
    MfaEnrolled,
    MfaVerified,
    MfaFailed,
    MfaRemoved,
    DecryptionFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccessGranted => "access_granted",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::RoleAssigned => "role_assigned",
            AuditAction::RoleRevoked => "role_revoked",
            AuditAction::PrincipalRegistered => "principal_registered",
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::LoginBlocked => "login_blocked",
            AuditAction::AccountLocked => "account_locked",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionEvicted => "session_evicted",
            AuditAction::TokenRefreshed => "token_refreshed",
            AuditAction::RefreshRejected => "refresh_rejected",
            AuditAction::InvalidTokenUsage => "invalid_token_usage",
            AuditAction::UserLogout => "user_logout",
            AuditAction::MfaEnrolled => "mfa_enrolled",
            AuditAction::MfaVerified => "mfa_verified",
            AuditAction::MfaFailed => "mfa_failed",
            AuditAction::MfaRemoved => "mfa_removed",
            AuditAction::DecryptionFailed => "decryption_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical events are pushed to the security notifier.
    pub fn is_escalated(&self) -> bool {
        *self >= Severity::High
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub status: AuditStatus,
    pub reason: Option<String>,
    pub severity: Severity,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Audit event entity. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub metadata: AuditMetadata,
}

impl AuditEvent {
    /// A successful, informational event. Refine with the builder methods.
    pub fn new(action: AuditAction, resource: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp,
            principal_id: None,
            action: action.as_str().to_string(),
            resource: resource.into(),
            resource_id: None,
            old_value: None,
            new_value: None,
            metadata: AuditMetadata {
                status: AuditStatus::Success,
                reason: None,
                severity: Severity::Info,
                ip_address: None,
                user_agent: None,
            },
        }
    }

    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn old_value(mut self, value: serde_json::Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: serde_json::Value) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.metadata.status = AuditStatus::Failure;
        self.metadata.reason = Some(reason.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.metadata.reason = Some(reason.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.metadata.severity = severity;
        self
    }

    pub fn client(mut self, ip_address: &str, user_agent: &str) -> Self {
        self.metadata.ip_address = Some(ip_address.to_string());
        self.metadata.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.metadata.status == AuditStatus::Failure
    }
}

/// Filters for audit queries. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub status: Option<AuditStatus>,
    pub principal_id: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn actions(actions: impl IntoIterator<Item = AuditAction>) -> Self {
        Self {
            actions: actions.into_iter().map(|a| a.as_str().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Inclusive time range.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp <= to)
            && (self.actions.is_empty() || self.actions.iter().any(|a| *a == event.action))
            && (self.resources.is_empty() || self.resources.iter().any(|r| *r == event.resource))
            && self.status.map_or(true, |status| event.metadata.status == status)
            && self
                .principal_id
                .as_ref()
                .map_or(true, |p| event.principal_id.as_ref() == Some(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder_sets_failure_metadata() {
        let event = AuditEvent::new(AuditAction::AccessDenied, "system", Utc::now())
            .principal("u1")
            .failure("missing permission manage_system")
            .severity(Severity::Medium);

        assert_eq!(event.action, "access_denied");
        assert!(event.is_failure());
        assert_eq!(event.principal_id.as_deref(), Some("u1"));
        assert!(!event.metadata.severity.is_escalated());
    }

    #[test]
    fn test_query_matching() {
        let now = Utc::now();
        let event = AuditEvent::new(AuditAction::RoleAssigned, "role_grant", now).principal("admin");

        assert!(AuditQuery::default().matches(&event));
        assert!(AuditQuery::actions([AuditAction::RoleAssigned]).matches(&event));
        assert!(!AuditQuery::actions([AuditAction::AccessDenied]).matches(&event));

        let window = AuditQuery {
            from: Some(now - Duration::minutes(1)),
            to: Some(now),
            ..AuditQuery::default()
        };
        assert!(window.matches(&event));

        let failures = AuditQuery {
            status: Some(AuditStatus::Failure),
            ..AuditQuery::default()
        };
        assert!(!failures.matches(&event));

        let other_principal = AuditQuery {
            principal_id: Some("u2".to_string()),
            ..AuditQuery::default()
        };
        assert!(!other_principal.matches(&event));
    }

    #[test]
    fn test_severity_escalation_threshold() {
        assert!(!Severity::Medium.is_escalated());
        assert!(Severity::High.is_escalated());
        assert!(Severity::Critical.is_escalated());
    }
}
