//! Role definitions and inheritance resolution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::AccessError;
use crate::models::{Permission, RoleDefinition};

/// Registered roles. Every mutation bumps [`RoleRegistry::generation`] so
/// cached permission sets computed against an older graph are discarded.
#[derive(Default)]
pub struct RoleRegistry {
    roles: DashMap<String, Arc<RoleDefinition>>,
    generation: AtomicU64,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the viewer/editor/manager/admin ladder.
    pub fn with_default_roles() -> Result<Self, AccessError> {
        let registry = Self::new();
        for def in RoleDefinition::defaults() {
            registry.register(def)?;
        }
        Ok(registry)
    }

    pub fn register(&self, def: RoleDefinition) -> Result<(), AccessError> {
        if def.name.trim().is_empty() {
            return Err(AccessError::ValidationError("Role name must not be empty".to_string()));
        }
        match self.roles.entry(def.name.clone()) {
            Entry::Occupied(_) => Err(AccessError::DuplicateRole(def.name)),
            Entry::Vacant(slot) => {
                tracing::debug!(role = %def.name, "Registered role");
                slot.insert(Arc::new(def));
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Swaps an existing definition for a new one with the same name.
    pub fn replace(&self, def: RoleDefinition) -> Result<(), AccessError> {
        match self.roles.get_mut(&def.name) {
            Some(mut existing) => {
                tracing::info!(role = %def.name, "Replaced role definition");
                *existing = Arc::new(def);
                self.generation.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AccessError::UnknownRole(def.name)),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<RoleDefinition>, AccessError> {
        self.roles
            .get(name)
            .map(|def| Arc::clone(def.value()))
            .ok_or_else(|| AccessError::UnknownRole(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Permissions of `role` plus everything reachable through its
    /// inheritance list.
    pub fn expand(&self, role: &str) -> Result<BTreeSet<Permission>, AccessError> {
        let mut permissions = BTreeSet::new();
        self.visit(role, &mut Vec::new(), &mut HashSet::new(), &mut permissions)?;
        Ok(permissions)
    }

    /// Union of [`RoleRegistry::expand`] over several roles, sharing the
    /// visited set so common ancestors are walked once.
    pub fn expand_all<'a>(
        &self,
        roles: impl IntoIterator<Item = &'a str>,
    ) -> Result<BTreeSet<Permission>, AccessError> {
        let mut permissions = BTreeSet::new();
        let mut done = HashSet::new();
        for role in roles {
            self.visit(role, &mut Vec::new(), &mut done, &mut permissions)?;
        }
        Ok(permissions)
    }

    /// Walks every role once. Fails on dangling inherited names and cycles.
    pub fn validate_graph(&self) -> Result<(), AccessError> {
        let names = self.names();
        self.expand_all(names.iter().map(String::as_str)).map(|_| ())
    }

    fn visit(
        &self,
        name: &str,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
        permissions: &mut BTreeSet<Permission>,
    ) -> Result<(), AccessError> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| p == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(AccessError::InheritanceCycle(cycle));
        }

        let def = self.resolve(name)?;
        permissions.extend(def.permissions.iter().copied());

        path.push(name.to_string());
        for parent in &def.inherits {
            self.visit(parent, path, done, permissions)?;
        }
        path.pop();
        done.insert(name.to_string());
        Ok(())
    }
}
