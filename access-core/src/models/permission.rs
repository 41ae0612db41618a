//! Permission catalogue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An action a principal may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read dashboards and analytics for connected accounts.
    ViewAnalytics,
    /// Edit drafts, schedules and media.
    ManageContent,
    /// Publish content to connected platforms.
    PublishContent,
    /// Add, remove and configure social accounts.
    ManageAccounts,
    /// Link third-party platforms.
    ConnectPlatforms,
    ManageBilling,
    ViewAuditLog,
    /// Grant and revoke roles.
    AssignRoles,
    ManageSystem,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::ViewAnalytics,
        Permission::ManageContent,
        Permission::PublishContent,
        Permission::ManageAccounts,
        Permission::ConnectPlatforms,
        Permission::ManageBilling,
        Permission::ViewAuditLog,
        Permission::AssignRoles,
        Permission::ManageSystem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewAnalytics => "view_analytics",
            Permission::ManageContent => "manage_content",
            Permission::PublishContent => "publish_content",
            Permission::ManageAccounts => "manage_accounts",
            Permission::ConnectPlatforms => "connect_platforms",
            Permission::ManageBilling => "manage_billing",
            Permission::ViewAuditLog => "view_audit_log",
            Permission::AssignRoles => "assign_roles",
            Permission::ManageSystem => "manage_system",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_string_forms_round_trip() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(permission));
        }
    }

    #[test]
    fn test_unknown_permission() {
        assert!("delete_everything".parse::<Permission>().is_err());
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&Permission::ViewAuditLog).unwrap();
        assert_eq!(json, "\"view_audit_log\"");
    }
}
