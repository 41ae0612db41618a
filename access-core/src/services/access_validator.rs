use std::sync::Arc;

use super::audit::AuditLog;
use super::error::AccessError;
use super::metrics;
use super::permission_resolver::PermissionResolver;
use crate::clock::Clock;
use crate::models::{AuditAction, AuditEvent, Permission, Severity};

/// Resource name used for administrative checks that are not tied to a
/// particular object.
pub const SYSTEM_RESOURCE: &str = "system";

/// The single gate every protected operation passes through. Each decision
/// is written to the audit log before it is returned.
#[derive(Clone)]
pub struct AccessValidator {
    resolver: Arc<PermissionResolver>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl AccessValidator {
    pub fn new(resolver: Arc<PermissionResolver>, audit: AuditLog, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            audit,
            clock,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        principal_id: &str,
        resource: &str,
        permission: Permission,
    ) -> Result<(), AccessError> {
        let now = self.clock.now();
        let granted = self
            .resolver
            .effective_permissions_at(principal_id, now)
            .await?
            .contains(&permission);
        self.record(principal_id, resource, None, permission, granted)
            .await
    }

    /// Like [`AccessValidator::validate`] but only grants whose scope is
    /// empty or contains `resource_id` count.
    #[tracing::instrument(skip(self))]
    pub async fn validate_resource(
        &self,
        principal_id: &str,
        resource: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<(), AccessError> {
        let granted = self
            .resolver
            .has_resource_access(principal_id, resource_id, permission)
            .await?;
        self.record(principal_id, resource, Some(resource_id), permission, granted)
            .await
    }

    async fn record(
        &self,
        principal_id: &str,
        resource: &str,
        resource_id: Option<&str>,
        permission: Permission,
        granted: bool,
    ) -> Result<(), AccessError> {
        metrics::record_access_decision(granted, permission.as_str());
        let now = self.clock.now();

        let event = if granted {
            AuditEvent::new(AuditAction::AccessGranted, resource, now)
                .reason(format!("permission {}", permission))
        } else {
            tracing::info!(
                principal_id = %principal_id,
                resource = %resource,
                permission = %permission,
                "Access denied"
            );
            AuditEvent::new(AuditAction::AccessDenied, resource, now)
                .failure(format!("missing permission {}", permission))
                .severity(Severity::Medium)
        };
        let event = event.principal(principal_id);
        let event = match resource_id {
            Some(id) => event.resource_id(id),
            None => event,
        };
        self.audit.append(event).await?;

        if granted {
            Ok(())
        } else {
            Err(AccessError::AccessDenied {
                resource: resource_id.unwrap_or(resource).to_string(),
                permission,
            })
        }
    }
}
