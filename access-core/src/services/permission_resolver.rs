//! Effective permission computation with invalidation-on-write caching.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::AccessError;
use super::role_registry::RoleRegistry;
use crate::clock::Clock;
use crate::models::{Permission, RoleGrant};
use crate::store::GrantRepository;

struct CachedPermissions {
    generation: u64,
    computed_at: DateTime<Utc>,
    /// Earliest expiry among the grants the set was computed from.
    valid_until: Option<DateTime<Utc>>,
    permissions: Arc<BTreeSet<Permission>>,
}

impl CachedPermissions {
    fn usable(&self, generation: u64, now: DateTime<Utc>) -> bool {
        self.generation == generation
            && self.computed_at <= now
            && self.valid_until.map_or(true, |until| now < until)
    }
}

pub struct PermissionResolver {
    registry: Arc<RoleRegistry>,
    grants: Arc<dyn GrantRepository>,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, CachedPermissions>,
    /// Bumped by every `invalidate`. A set computed while it moved is not
    /// stored.
    invalidations: AtomicU64,
}

impl PermissionResolver {
    pub fn new(
        registry: Arc<RoleRegistry>,
        grants: Arc<dyn GrantRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            grants,
            clock,
            cache: DashMap::new(),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub async fn effective_permissions(
        &self,
        principal_id: &str,
    ) -> Result<Arc<BTreeSet<Permission>>, AccessError> {
        self.effective_permissions_at(principal_id, self.clock.now()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn effective_permissions_at(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<BTreeSet<Permission>>, AccessError> {
        let invalidations = self.invalidations.load(Ordering::SeqCst);
        let generation = self.registry.generation();

        if let Some(cached) = self.cache.get(principal_id) {
            if cached.usable(generation, now) {
                return Ok(Arc::clone(&cached.permissions));
            }
        }

        let active = self.active_grants(principal_id, now).await?;
        let permissions = Arc::new(
            self.registry
                .expand_all(active.iter().map(|g| g.role.as_str()))?,
        );
        let valid_until = active.iter().filter_map(|g| g.expires_at).min();

        // The counter is read under the shard lock. An `invalidate` that bumps
        // it later still has to take that lock to remove the entry.
        let entry = CachedPermissions {
            generation,
            computed_at: now,
            valid_until,
            permissions: Arc::clone(&permissions),
        };
        let slot = self.cache.entry(principal_id.to_string());
        if self.invalidations.load(Ordering::SeqCst) == invalidations {
            slot.insert(entry);
        }

        tracing::debug!(
            principal_id = %principal_id,
            grants = active.len(),
            permissions = permissions.len(),
            "Computed effective permissions"
        );
        Ok(permissions)
    }

    /// Resource identifiers named by active grants whose role carries
    /// `permission`. Unscoped grants contribute no identifiers.
    pub async fn accessible_resources(
        &self,
        principal_id: &str,
        permission: Permission,
    ) -> Result<BTreeSet<String>, AccessError> {
        let now = self.clock.now();
        let mut resources = BTreeSet::new();
        for grant in self.active_grants(principal_id, now).await? {
            if self.registry.expand(&grant.role)?.contains(&permission) {
                resources.extend(grant.scope.iter().cloned());
            }
        }
        Ok(resources)
    }

    /// True when an active grant carrying `permission` is unscoped or names
    /// `resource_id`.
    pub async fn has_resource_access(
        &self,
        principal_id: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<bool, AccessError> {
        let now = self.clock.now();
        for grant in self.active_grants(principal_id, now).await? {
            if grant.applies_to(resource_id) && self.registry.expand(&grant.role)?.contains(&permission) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drops the cached set for a principal. Must be called after every
    /// grant mutation for that principal, before the mutation is reported.
    pub fn invalidate(&self, principal_id: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.cache.remove(principal_id);
    }

    pub fn cached_principals(&self) -> usize {
        self.cache.len()
    }

    /// Drops cached sets that can no longer be served at `now`. Returns the
    /// number removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let generation = self.registry.generation();
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.usable(generation, now));
        before.saturating_sub(self.cache.len())
    }

    async fn active_grants(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleGrant>, AccessError> {
        let grants = self.grants.list_for_principal(principal_id).await?;
        Ok(grants.into_iter().filter(|g| g.is_active_at(now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{RoleDefinition, ROLE_EDITOR, ROLE_VIEWER};
    use crate::store::InMemoryGrantRepository;
    use chrono::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        grants: Arc<InMemoryGrantRepository>,
        resolver: PermissionResolver,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let grants = Arc::new(InMemoryGrantRepository::new());
        let registry = Arc::new(RoleRegistry::with_default_roles().unwrap());
        let resolver = PermissionResolver::new(registry, grants.clone(), clock.clone());
        Fixture {
            clock,
            grants,
            resolver,
        }
    }

    fn grant(role: &str, scope: &[&str], now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> RoleGrant {
        RoleGrant::new(
            "u1",
            role,
            scope.iter().map(|s| s.to_string()).collect(),
            now,
            None,
            expires_at,
        )
    }

    #[tokio::test]
    async fn test_expired_grants_are_excluded() {
        let f = fixture();
        let now = f.clock.now();
        f.grants
            .insert(grant(ROLE_EDITOR, &[], now, Some(now + Duration::minutes(5))))
            .await
            .unwrap();

        let before = f.resolver.effective_permissions_at("u1", now).await.unwrap();
        assert!(before.contains(&Permission::ManageContent));

        let at_expiry = f
            .resolver
            .effective_permissions_at("u1", now + Duration::minutes(5))
            .await
            .unwrap();
        assert!(at_expiry.is_empty());
    }

    #[tokio::test]
    async fn test_cache_served_until_invalidated() {
        let f = fixture();
        let now = f.clock.now();
        f.grants.insert(grant(ROLE_VIEWER, &[], now, None)).await.unwrap();
        let first = f.resolver.effective_permissions("u1").await.unwrap();
        assert_eq!(f.resolver.cached_principals(), 1);

        // A write that bypasses invalidation is not visible.
        f.grants.insert(grant(ROLE_EDITOR, &[], now, None)).await.unwrap();
        let cached = f.resolver.effective_permissions("u1").await.unwrap();
        assert_eq!(first, cached);

        f.resolver.invalidate("u1");
        let fresh = f.resolver.effective_permissions("u1").await.unwrap();
        assert!(fresh.contains(&Permission::PublishContent));
    }

    #[tokio::test]
    async fn test_invalidation_keeps_no_per_principal_state() {
        let f = fixture();
        for i in 0..50 {
            f.resolver.invalidate(&format!("ghost-{}", i));
        }
        assert_eq!(f.resolver.cached_principals(), 0);
    }

    #[tokio::test]
    async fn test_prune_drops_sets_past_grant_expiry() {
        let f = fixture();
        let now = f.clock.now();
        f.grants
            .insert(grant(ROLE_VIEWER, &[], now, Some(now + Duration::minutes(5))))
            .await
            .unwrap();
        f.resolver.effective_permissions("u1").await.unwrap();

        assert_eq!(f.resolver.prune(now), 0);
        assert_eq!(f.resolver.prune(now + Duration::minutes(5)), 1);
        assert_eq!(f.resolver.cached_principals(), 0);
    }

    #[tokio::test]
    async fn test_registry_change_discards_cache() {
        let f = fixture();
        let now = f.clock.now();
        f.grants.insert(grant(ROLE_VIEWER, &[], now, None)).await.unwrap();
        f.resolver.effective_permissions("u1").await.unwrap();

        f.resolver
            .registry()
            .replace(RoleDefinition::new(ROLE_VIEWER).with_permissions([Permission::ViewAuditLog]))
            .unwrap();
        let perms = f.resolver.effective_permissions("u1").await.unwrap();
        assert!(perms.contains(&Permission::ViewAuditLog));
        assert!(!perms.contains(&Permission::ViewAnalytics));
    }

    #[tokio::test]
    async fn test_accessible_resources_requires_permission() {
        let f = fixture();
        let now = f.clock.now();
        f.grants.insert(grant(ROLE_VIEWER, &["acct-1"], now, None)).await.unwrap();
        f.grants.insert(grant(ROLE_EDITOR, &["acct-2"], now, None)).await.unwrap();

        let analytics = f
            .resolver
            .accessible_resources("u1", Permission::ViewAnalytics)
            .await
            .unwrap();
        assert_eq!(analytics, BTreeSet::from(["acct-1".to_string(), "acct-2".to_string()]));

        let publish = f
            .resolver
            .accessible_resources("u1", Permission::PublishContent)
            .await
            .unwrap();
        assert_eq!(publish, BTreeSet::from(["acct-2".to_string()]));

        assert!(f
            .resolver
            .has_resource_access("u1", "acct-2", Permission::PublishContent)
            .await
            .unwrap());
        assert!(!f
            .resolver
            .has_resource_access("u1", "acct-1", Permission::PublishContent)
            .await
            .unwrap());
    }
}
