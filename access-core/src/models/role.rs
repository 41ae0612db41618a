//! Role definitions - named permission sets with inheritance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::Permission;

pub const ROLE_VIEWER: &str = "viewer";
pub const ROLE_EDITOR: &str = "editor";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_ADMIN: &str = "admin";

/// Role definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    pub permissions: BTreeSet<Permission>,
    /// Roles whose permissions this role also carries.
    pub inherits: Vec<String>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: BTreeSet::new(),
            inherits: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn inheriting(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inherits.extend(roles.into_iter().map(Into::into));
        self
    }

    /// The social-media role ladder: viewer < editor < manager < admin.
    pub fn defaults() -> Vec<RoleDefinition> {
        vec![
            RoleDefinition::new(ROLE_VIEWER).with_permissions([Permission::ViewAnalytics]),
            RoleDefinition::new(ROLE_EDITOR)
                .with_permissions([Permission::ManageContent, Permission::PublishContent])
                .inheriting([ROLE_VIEWER]),
            RoleDefinition::new(ROLE_MANAGER)
                .with_permissions([
                    Permission::ManageAccounts,
                    Permission::ConnectPlatforms,
                    Permission::ViewAuditLog,
                ])
                .inheriting([ROLE_EDITOR]),
            RoleDefinition::new(ROLE_ADMIN)
                .with_permissions([
                    Permission::AssignRoles,
                    Permission::ManageBilling,
                    Permission::ManageSystem,
                ])
                .inheriting([ROLE_MANAGER]),
        ]
    }
}
