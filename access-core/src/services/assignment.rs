//! Role assignment and revocation.
//!
//! Both operations are themselves protected: the actor must hold
//! `AssignRoles` on the system resource.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::access_validator::{AccessValidator, SYSTEM_RESOURCE};
use super::audit::AuditLog;
use super::error::AccessError;
use super::permission_resolver::PermissionResolver;
use crate::clock::Clock;
use crate::models::{AuditAction, AuditEvent, Permission, RoleGrant, Severity};
use crate::store::GrantRepository;

const GRANT_RESOURCE: &str = "role_grant";

#[derive(Clone)]
pub struct RoleAssignment {
    grants: Arc<dyn GrantRepository>,
    resolver: Arc<PermissionResolver>,
    validator: AccessValidator,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl RoleAssignment {
    pub fn new(
        grants: Arc<dyn GrantRepository>,
        resolver: Arc<PermissionResolver>,
        validator: AccessValidator,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grants,
            resolver,
            validator,
            audit,
            clock,
        }
    }

    #[tracing::instrument(skip(self, scope))]
    pub async fn assign_role(
        &self,
        actor_id: &str,
        target_id: &str,
        role: &str,
        scope: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleGrant, AccessError> {
        self.validator
            .validate(actor_id, SYSTEM_RESOURCE, Permission::AssignRoles)
            .await?;
        self.resolver.registry().resolve(role)?;

        let now = self.clock.now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(AccessError::ValidationError(
                "Grant expiry must be in the future".to_string(),
            ));
        }

        let grant = RoleGrant::new(
            target_id,
            role,
            scope,
            now,
            Some(actor_id.to_string()),
            expires_at,
        );
        self.grants.insert(grant.clone()).await?;
        self.resolver.invalidate(target_id);

        let snapshot = serde_json::to_value(&grant).map_err(|e| AccessError::Internal(e.into()))?;
        self.audit
            .append(
                AuditEvent::new(AuditAction::RoleAssigned, GRANT_RESOURCE, now)
                    .principal(actor_id)
                    .resource_id(target_id)
                    .new_value(snapshot)
                    .severity(Severity::Low),
            )
            .await?;

        tracing::info!(
            actor_id = %actor_id,
            target_id = %target_id,
            role = %role,
            grant_id = %grant.grant_id,
            "Role assigned"
        );
        Ok(grant)
    }

    /// Removes every grant of `role` held by the target. Revoking a role the
    /// target does not hold succeeds and is still audited.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_role(
        &self,
        actor_id: &str,
        target_id: &str,
        role: &str,
    ) -> Result<Vec<RoleGrant>, AccessError> {
        self.validator
            .validate(actor_id, SYSTEM_RESOURCE, Permission::AssignRoles)
            .await?;
        self.resolver.registry().resolve(role)?;

        let removed = self.grants.remove(target_id, role).await?;
        self.resolver.invalidate(target_id);

        let snapshot = serde_json::to_value(&removed).map_err(|e| AccessError::Internal(e.into()))?;
        self.audit
            .append(
                AuditEvent::new(AuditAction::RoleRevoked, GRANT_RESOURCE, self.clock.now())
                    .principal(actor_id)
                    .resource_id(target_id)
                    .old_value(snapshot)
                    .severity(Severity::Low),
            )
            .await?;

        tracing::info!(
            actor_id = %actor_id,
            target_id = %target_id,
            role = %role,
            removed = removed.len(),
            "Role revoked"
        );
        Ok(removed)
    }

    /// Unchecked grant used once at startup to seed the first administrator.
    pub async fn bootstrap_grant(&self, target_id: &str, role: &str) -> Result<RoleGrant, AccessError> {
        self.resolver.registry().resolve(role)?;

        let now = self.clock.now();
        let grant = RoleGrant::new(target_id, role, BTreeSet::new(), now, None, None);
        self.grants.insert(grant.clone()).await?;
        self.resolver.invalidate(target_id);

        let snapshot = serde_json::to_value(&grant).map_err(|e| AccessError::Internal(e.into()))?;
        self.audit
            .append(
                AuditEvent::new(AuditAction::RoleAssigned, GRANT_RESOURCE, now)
                    .resource_id(target_id)
                    .new_value(snapshot)
                    .reason("bootstrap grant")
                    .severity(Severity::High),
            )
            .await?;

        tracing::warn!(target_id = %target_id, role = %role, "Bootstrap role grant issued");
        Ok(grant)
    }
}
