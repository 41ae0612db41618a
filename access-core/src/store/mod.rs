//! Repository interfaces for the state the core owns.
//!
//! Every trait is object safe and `Send + Sync` so services hold them as
//! `Arc<dyn ...>`. The in-memory implementations in [`memory`] back the
//! daemon and the tests; a durable backend only has to implement these.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AttemptReservation, AuditEvent, AuditQuery, LoginAttempts, MfaKind, MfaMethod, PrincipalRecord, RoleGrant, Session,
};

pub mod memory;

pub use memory::{
    InMemoryAuditRepository, InMemoryCredentialRepository, InMemoryGrantRepository,
    InMemoryLockoutRepository, InMemoryMfaRepository, InMemorySessionRepository,
};

#[async_trait]
pub trait GrantRepository: Send + Sync {
    async fn insert(&self, grant: RoleGrant) -> Result<(), anyhow::Error>;
    /// Removes every grant of `role` held by the principal and returns them.
    async fn remove(&self, principal_id: &str, role: &str) -> Result<Vec<RoleGrant>, anyhow::Error>;
    /// All grants, expired ones included.
    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<RoleGrant>, anyhow::Error>;
    /// Drops grants that are no longer active at `now`. Returns the number removed.
    async fn compact_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), anyhow::Error>;
    /// Inserts the session and revokes every other session of its principal
    /// that is active at `now`, with no other exclusive insert in between.
    /// Returns the revoked ids.
    async fn insert_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<Vec<Uuid>, anyhow::Error>;
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, anyhow::Error>;
    /// Records activity on a session that is still active at `now`, optionally
    /// moving its expiry. Returns the updated session, or `None` when the
    /// session is missing, revoked or expired.
    async fn touch(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Session>, anyhow::Error>;
    /// Sets `revoked_at` if the session is active at `at`. Returns the
    /// session as it was before revocation.
    async fn revoke_if_active(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, anyhow::Error>;
    async fn mark_mfa_verified(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error>;
    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<Session>, anyhow::Error>;
    /// Removes sessions that are revoked or expired at `now`.
    async fn purge(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends and returns how many old events were evicted to make room.
    async fn append(&self, event: AuditEvent) -> Result<usize, anyhow::Error>;
    /// Matching events, most recent first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, anyhow::Error>;
    /// Every retained event in chronological order.
    async fn snapshot(&self) -> Result<Vec<AuditEvent>, anyhow::Error>;
    async fn len(&self) -> Result<usize, anyhow::Error>;
}

#[async_trait]
pub trait LockoutRepository: Send + Sync {
    async fn get(&self, identifier: &str) -> Result<LoginAttempts, anyhow::Error>;
    /// Checks the lock and counts one attempt as a single step. A lockout that
    /// has elapsed at `now` is cleared first. The attempt that reaches
    /// `max_attempts` sets the lock for `lockout`.
    async fn reserve_attempt(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Result<AttemptReservation, anyhow::Error>;
    async fn clear(&self, identifier: &str) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Returns `false` when the identifier is already taken.
    async fn insert(&self, record: PrincipalRecord) -> Result<bool, anyhow::Error>;
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<PrincipalRecord>, anyhow::Error>;
}

#[async_trait]
pub trait MfaRepository: Send + Sync {
    async fn get(&self, principal_id: &str, kind: MfaKind) -> Result<Option<MfaMethod>, anyhow::Error>;
    async fn put(&self, method: MfaMethod) -> Result<(), anyhow::Error>;
    /// Swaps `current` for `next` only if the stored method still equals
    /// `current`. Returns whether the swap happened.
    async fn replace_if_unchanged(&self, current: &MfaMethod, next: MfaMethod) -> Result<bool, anyhow::Error>;
    async fn remove(&self, principal_id: &str, kind: MfaKind) -> Result<bool, anyhow::Error>;
    async fn list(&self, principal_id: &str) -> Result<Vec<MfaMethod>, anyhow::Error>;
}

/// The full set of repositories a core instance runs against.
#[derive(Clone)]
pub struct Stores {
    pub grants: Arc<dyn GrantRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub lockouts: Arc<dyn LockoutRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub mfa: Arc<dyn MfaRepository>,
}

impl Stores {
    pub fn in_memory(audit_capacity: usize) -> Self {
        Self {
            grants: Arc::new(InMemoryGrantRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            audit: Arc::new(InMemoryAuditRepository::new(audit_capacity)),
            lockouts: Arc::new(InMemoryLockoutRepository::new()),
            credentials: Arc::new(InMemoryCredentialRepository::new()),
            mfa: Arc::new(InMemoryMfaRepository::new()),
        }
    }
}
