use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    AuditRepository, CredentialRepository, GrantRepository, LockoutRepository, MfaRepository,
    SessionRepository,
};
use crate::models::{
    AttemptReservation, AuditEvent, AuditQuery, LoginAttempts, MfaKind, MfaMethod, PrincipalRecord, RoleGrant, Session,
};

#[derive(Default)]
pub struct InMemoryGrantRepository {
    grants: DashMap<String, Vec<RoleGrant>>,
}

impl InMemoryGrantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantRepository for InMemoryGrantRepository {
    async fn insert(&self, grant: RoleGrant) -> Result<(), anyhow::Error> {
        self.grants
            .entry(grant.principal_id.clone())
            .or_default()
            .push(grant);
        Ok(())
    }

    async fn remove(&self, principal_id: &str, role: &str) -> Result<Vec<RoleGrant>, anyhow::Error> {
        let Some(mut grants) = self.grants.get_mut(principal_id) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<_>, Vec<_>) = grants.drain(..).partition(|g| g.role == role);
        *grants = kept;
        Ok(removed)
    }

    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<RoleGrant>, anyhow::Error> {
        Ok(self
            .grants
            .get(principal_id)
            .map(|grants| grants.clone())
            .unwrap_or_default())
    }

    async fn compact_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        let mut removed = 0;
        self.grants.retain(|_, grants| {
            let before = grants.len();
            grants.retain(|g| g.is_active_at(now));
            removed += before - grants.len();
            !grants.is_empty()
        });
        Ok(removed)
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: DashMap<Uuid, Session>,
    /// Serialises `insert_exclusive` calls.
    exclusive: Mutex<()>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: Session) -> Result<(), anyhow::Error> {
        match self.sessions.entry(session.session_id) {
            Entry::Occupied(_) => Err(anyhow::anyhow!(
                "Session {} already exists",
                session.session_id
            )),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn insert_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<Vec<Uuid>, anyhow::Error> {
        let _serial = self
            .exclusive
            .lock()
            .map_err(|e| anyhow::anyhow!("Session mutex poisoned: {}", e))?;

        if self.sessions.contains_key(&session.session_id) {
            return Err(anyhow::anyhow!("Session {} already exists", session.session_id));
        }
        // Collect first; revoking while iterating would deadlock on the shard
        let others: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.principal_id == session.principal_id && s.is_active_at(now))
            .map(|s| s.session_id)
            .collect();

        let mut revoked = Vec::with_capacity(others.len());
        for id in others {
            if let Some(mut other) = self.sessions.get_mut(&id) {
                if other.is_active_at(now) {
                    other.revoked_at = Some(now);
                    revoked.push(id);
                }
            }
        }
        self.sessions.insert(session.session_id, session);
        Ok(revoked)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, anyhow::Error> {
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn touch(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Session>, anyhow::Error> {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if !session.is_active_at(now) {
            return Ok(None);
        }
        session.last_activity = now;
        if let Some(expires_at) = expires_at {
            session.expires_at = expires_at;
        }
        Ok(Some(session.clone()))
    }

    async fn revoke_if_active(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, anyhow::Error> {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if !session.is_active_at(at) {
            return Ok(None);
        }
        let before = session.clone();
        session.revoked_at = Some(at);
        Ok(Some(before))
    }

    async fn mark_mfa_verified(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) if session.is_active_at(now) => {
                session.mfa_verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<Session>, anyhow::Error> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.principal_id == principal_id)
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn purge(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_active_at(now));
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

/// Bounded ring of audit events. The oldest event is dropped when full.
pub struct InMemoryAuditRepository {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl InMemoryAuditRepository {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, event: AuditEvent) -> Result<usize, anyhow::Error> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit ring mutex poisoned: {}", e))?;
        let mut evicted = 0;
        while events.len() >= self.capacity {
            events.pop_front();
            evicted += 1;
        }
        events.push_back(event);
        Ok(evicted)
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, anyhow::Error> {
        let events = self
            .events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit ring mutex poisoned: {}", e))?;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> Result<Vec<AuditEvent>, anyhow::Error> {
        let events = self
            .events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit ring mutex poisoned: {}", e))?;
        Ok(events.iter().cloned().collect())
    }

    async fn len(&self) -> Result<usize, anyhow::Error> {
        let events = self
            .events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit ring mutex poisoned: {}", e))?;
        Ok(events.len())
    }
}

#[derive(Default)]
pub struct InMemoryLockoutRepository {
    attempts: DashMap<String, LoginAttempts>,
}

impl InMemoryLockoutRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockoutRepository for InMemoryLockoutRepository {
    async fn get(&self, identifier: &str) -> Result<LoginAttempts, anyhow::Error> {
        Ok(self
            .attempts
            .get(identifier)
            .map(|a| a.clone())
            .unwrap_or_default())
    }

    async fn reserve_attempt(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Result<AttemptReservation, anyhow::Error> {
        // The entry guard holds the shard lock until we return
        let mut attempts = self.attempts.entry(identifier.to_string()).or_default();
        if attempts.lockout_elapsed_at(now) {
            *attempts = LoginAttempts::default();
        }
        if let Some(until) = attempts.locked_until.filter(|until| *until > now) {
            return Ok(AttemptReservation::Locked { until });
        }

        attempts.failed_attempts = attempts.failed_attempts.saturating_add(1);
        attempts.last_failure_at = Some(now);
        let locks_until = (attempts.failed_attempts >= max_attempts).then(|| now + lockout);
        if locks_until.is_some() {
            attempts.locked_until = locks_until;
        }
        Ok(AttemptReservation::Allowed {
            attempts: attempts.failed_attempts,
            locks_until,
        })
    }

    async fn clear(&self, identifier: &str) -> Result<(), anyhow::Error> {
        self.attempts.remove(identifier);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    by_identifier: DashMap<String, PrincipalRecord>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn insert(&self, record: PrincipalRecord) -> Result<bool, anyhow::Error> {
        match self.by_identifier.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<PrincipalRecord>, anyhow::Error> {
        Ok(self.by_identifier.get(identifier).map(|r| r.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryMfaRepository {
    methods: DashMap<(String, MfaKind), MfaMethod>,
}

impl InMemoryMfaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MfaRepository for InMemoryMfaRepository {
    async fn get(&self, principal_id: &str, kind: MfaKind) -> Result<Option<MfaMethod>, anyhow::Error> {
        Ok(self
            .methods
            .get(&(principal_id.to_string(), kind))
            .map(|m| m.clone()))
    }

    async fn put(&self, method: MfaMethod) -> Result<(), anyhow::Error> {
        self.methods
            .insert((method.principal_id.clone(), method.kind), method);
        Ok(())
    }

    async fn replace_if_unchanged(&self, current: &MfaMethod, next: MfaMethod) -> Result<bool, anyhow::Error> {
        let key = (current.principal_id.clone(), current.kind);
        match self.methods.get_mut(&key) {
            Some(mut stored) if *stored == *current => {
                *stored = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, principal_id: &str, kind: MfaKind) -> Result<bool, anyhow::Error> {
        Ok(self
            .methods
            .remove(&(principal_id.to_string(), kind))
            .is_some())
    }

    async fn list(&self, principal_id: &str) -> Result<Vec<MfaMethod>, anyhow::Error> {
        let mut methods: Vec<MfaMethod> = self
            .methods
            .iter()
            .filter(|m| m.principal_id == principal_id)
            .map(|m| m.value().clone())
            .collect();
        methods.sort_by_key(|m| m.created_at);
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, ClientContext};
    use std::collections::BTreeSet;

    fn session(principal: &str, now: DateTime<Utc>) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            principal_id: principal.to_string(),
            access_token_hash: "a".to_string(),
            refresh_token_hash: "r".to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(30),
            last_activity: now,
            client: ClientContext::new("10.0.0.1", "agent"),
            mfa_verified: false,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_grant_remove_only_matching_role() {
        let repo = InMemoryGrantRepository::new();
        let now = Utc::now();
        repo.insert(RoleGrant::new("u1", "viewer", BTreeSet::new(), now, None, None))
            .await
            .unwrap();
        repo.insert(RoleGrant::new("u1", "editor", BTreeSet::new(), now, None, None))
            .await
            .unwrap();

        let removed = repo.remove("u1", "viewer").await.unwrap();
        assert_eq!(removed.len(), 1);

        let left = repo.list_for_principal("u1").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].role, "editor");
        assert!(repo.remove("nobody", "viewer").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grant_compaction_drops_expired() {
        let repo = InMemoryGrantRepository::new();
        let now = Utc::now();
        repo.insert(RoleGrant::new(
            "u1",
            "viewer",
            BTreeSet::new(),
            now,
            None,
            Some(now - Duration::seconds(1)),
        ))
        .await
        .unwrap();
        repo.insert(RoleGrant::new("u2", "viewer", BTreeSet::new(), now, None, None))
            .await
            .unwrap();

        assert_eq!(repo.compact_expired(now).await.unwrap(), 1);
        assert!(repo.list_for_principal("u1").await.unwrap().is_empty());
        assert_eq!(repo.list_for_principal("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_revoke_happens_once() {
        let repo = InMemorySessionRepository::new();
        let now = Utc::now();
        let s = session("u1", now);
        let id = s.session_id;
        repo.insert(s).await.unwrap();

        assert!(repo.revoke_if_active(id, now).await.unwrap().is_some());
        assert!(repo.revoke_if_active(id, now).await.unwrap().is_none());
        assert!(repo.touch(id, now, None).await.unwrap().is_none());
        assert_eq!(repo.purge(now).await.unwrap(), 1);
        assert!(repo.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_ring_evicts_oldest() {
        let repo = InMemoryAuditRepository::new(2);
        let now = Utc::now();
        for i in 0..3 {
            let evicted = repo
                .append(
                    AuditEvent::new(AuditAction::AccessGranted, "system", now + Duration::seconds(i))
                        .principal(format!("u{}", i)),
                )
                .await
                .unwrap();
            assert_eq!(evicted, if i < 2 { 0 } else { 1 });
        }

        let snapshot = repo.snapshot().await.unwrap();
        let principals: Vec<_> = snapshot
            .iter()
            .filter_map(|e| e.principal_id.clone())
            .collect();
        assert_eq!(principals, vec!["u1", "u2"]);

        let recent = repo.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(recent[0].principal_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_session_exclusive_insert_revokes_siblings() {
        let repo = InMemorySessionRepository::new();
        let now = Utc::now();
        let first = session("u1", now);
        let other_principal = session("u2", now);
        let first_id = first.session_id;
        repo.insert(first).await.unwrap();
        repo.insert(other_principal).await.unwrap();

        let second = session("u1", now);
        let second_id = second.session_id;
        assert_eq!(repo.insert_exclusive(second, now).await.unwrap(), vec![first_id]);

        let active: Vec<Uuid> = repo
            .list_for_principal("u1")
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .map(|s| s.session_id)
            .collect();
        assert_eq!(active, vec![second_id]);
        assert!(repo.list_for_principal("u2").await.unwrap()[0].is_active_at(now));
    }

    #[tokio::test]
    async fn test_lockout_reservation_locks_at_threshold() {
        let repo = InMemoryLockoutRepository::new();
        let now = Utc::now();
        let lockout = Duration::minutes(1);

        assert_eq!(
            repo.reserve_attempt("alice", now, 2, lockout).await.unwrap(),
            AttemptReservation::Allowed { attempts: 1, locks_until: None }
        );
        assert_eq!(
            repo.reserve_attempt("alice", now, 2, lockout).await.unwrap(),
            AttemptReservation::Allowed {
                attempts: 2,
                locks_until: Some(now + lockout)
            }
        );
        assert_eq!(
            repo.reserve_attempt("alice", now, 2, lockout).await.unwrap(),
            AttemptReservation::Locked { until: now + lockout }
        );
        // Rejected attempts are not counted
        assert_eq!(repo.get("alice").await.unwrap().failed_attempts, 2);
    }

    #[tokio::test]
    async fn test_lockout_reservation_resets_after_window() {
        let repo = InMemoryLockoutRepository::new();
        let now = Utc::now();
        repo.reserve_attempt("alice", now, 1, Duration::minutes(1))
            .await
            .unwrap();

        let later = now + Duration::minutes(2);
        assert_eq!(
            repo.reserve_attempt("alice", later, 3, Duration::minutes(1))
                .await
                .unwrap(),
            AttemptReservation::Allowed { attempts: 1, locks_until: None }
        );
        assert!(repo.get("alice").await.unwrap().locked_until.is_none());
    }

    #[tokio::test]
    async fn test_credentials_reject_duplicate_identifier() {
        let repo = InMemoryCredentialRepository::new();
        let now = Utc::now();
        assert!(repo
            .insert(PrincipalRecord::new("alice", "hash".to_string(), now))
            .await
            .unwrap());
        assert!(!repo
            .insert(PrincipalRecord::new("alice", "other".to_string(), now))
            .await
            .unwrap());
    }
}
