//! Role grant model - a role held by a principal, optionally scoped and time-bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Role grant entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub grant_id: Uuid,
    pub principal_id: String,
    pub role: String,
    /// Resource identifiers the grant applies to. Empty means unscoped.
    pub scope: BTreeSet<String>,
    pub granted_at: DateTime<Utc>,
    /// `None` for system bootstrap grants.
    pub granted_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleGrant {
    pub fn new(
        principal_id: impl Into<String>,
        role: impl Into<String>,
        scope: BTreeSet<String>,
        granted_at: DateTime<Utc>,
        granted_by: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            grant_id: Uuid::new_v4(),
            principal_id: principal_id.into(),
            role: role.into(),
            scope,
            granted_at,
            granted_by,
            expires_at,
        }
    }

    /// A grant is active while it has no expiry or its expiry is still ahead.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    pub fn is_unscoped(&self) -> bool {
        self.scope.is_empty()
    }

    /// Whether the grant covers `resource_id`.
    pub fn applies_to(&self, resource_id: &str) -> bool {
        self.is_unscoped() || self.scope.contains(resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(expires_at: Option<DateTime<Utc>>, scope: &[&str]) -> RoleGrant {
        RoleGrant::new(
            "u1",
            "viewer",
            scope.iter().map(|s| s.to_string()).collect(),
            Utc::now(),
            Some("admin".to_string()),
            expires_at,
        )
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let now = Utc::now();
        assert!(grant(None, &[]).is_active_at(now));
        assert!(grant(Some(now + Duration::seconds(1)), &[]).is_active_at(now));
        assert!(!grant(Some(now), &[]).is_active_at(now));
        assert!(!grant(Some(now - Duration::seconds(1)), &[]).is_active_at(now));
    }

    #[test]
    fn test_scope_matching() {
        assert!(grant(None, &[]).applies_to("acct-9"));
        let scoped = grant(None, &["acct-1"]);
        assert!(scoped.applies_to("acct-1"));
        assert!(!scoped.applies_to("acct-2"));
    }
}
