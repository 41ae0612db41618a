//! Session lifecycle: issue, validate, rotate, revoke.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::error::AccessError;
use super::metrics;
use super::token::{PrincipalClaims, TokenPair, TokenService};
use crate::clock::Clock;
use crate::models::{ClientContext, Session, SessionInfo, SessionState};
use crate::store::SessionRepository;
use crate::utils::{constant_time_eq, hash_token};

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub duration: Duration,
    /// Push `expires_at` forward on every successful validation.
    pub extend_on_activity: bool,
    /// A new session revokes every other session of the same principal.
    pub single_session: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            duration: Duration::minutes(60),
            extend_on_activity: true,
            single_session: false,
        }
    }
}

/// A freshly created session together with the only copy of its tokens.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub tokens: TokenPair,
    /// Sessions revoked by the single-session policy.
    pub evicted: Vec<Uuid>,
}

#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    tokens: TokenService,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        tokens: TokenService,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            tokens,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    #[tracing::instrument(skip(self, client))]
    pub async fn create(
        &self,
        principal_id: &str,
        client: ClientContext,
        mfa_verified: bool,
    ) -> Result<IssuedSession, AccessError> {
        let now = self.clock.now();
        let session_id = Uuid::new_v4();
        let access_token = self.tokens.issue_access_token(principal_id, session_id, now)?;
        let refresh_token = self.tokens.issue_refresh_token(session_id);
        let expires_at = now + self.policy.duration;

        let session = Session {
            session_id,
            principal_id: principal_id.to_string(),
            access_token_hash: hash_token(&access_token),
            refresh_token_hash: hash_token(&refresh_token),
            created_at: now,
            expires_at,
            last_activity: now,
            client,
            mfa_verified,
            revoked_at: None,
        };
        let evicted = if self.policy.single_session {
            self.repo.insert_exclusive(session.clone(), now).await?
        } else {
            self.repo.insert(session.clone()).await?;
            Vec::new()
        };
        metrics::record_session_issued();

        tracing::info!(
            principal_id = %principal_id,
            session_id = %session_id,
            evicted = evicted.len(),
            "Session created"
        );
        Ok(IssuedSession {
            session,
            tokens: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_at,
            },
            evicted,
        })
    }

    /// Resolves an access token to its claims. Expiry is checked against the
    /// session on every call; activity extends it when the policy says so.
    pub async fn validate_token(&self, token: &str) -> Result<PrincipalClaims, AccessError> {
        let now = self.clock.now();
        let (claims, _) = self.authenticate_access(token, now).await?;

        let extended = self
            .policy
            .extend_on_activity
            .then(|| now + self.policy.duration);
        match self.repo.touch(claims.sid, now, extended).await? {
            Some(_) => Ok(claims),
            None => Err(AccessError::InvalidToken),
        }
    }

    /// Consumes a refresh token: the old session is revoked and a new one
    /// issued in its place. A token can be used once, and only while its
    /// session is live.
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedSession, AccessError> {
        let now = self.clock.now();
        let session_id =
            TokenService::refresh_session_id(refresh_token).ok_or(AccessError::InvalidRefreshToken)?;
        let session = self
            .repo
            .get(session_id)
            .await?
            .ok_or(AccessError::InvalidRefreshToken)?;

        if !constant_time_eq(&hash_token(refresh_token), &session.refresh_token_hash) {
            return Err(AccessError::InvalidRefreshToken);
        }
        match session.state_at(now) {
            SessionState::Active => {}
            SessionState::Expired => {
                tracing::debug!(session_id = %session_id, "Refresh token presented after expiry");
                return Err(AccessError::InvalidRefreshToken);
            }
            SessionState::Revoked => {
                tracing::warn!(
                    principal_id = %session.principal_id,
                    session_id = %session_id,
                    "Refresh token reused after rotation"
                );
                return Err(AccessError::InvalidRefreshToken);
            }
        }

        // Two concurrent refreshes with the same token: only one wins.
        let consumed = self
            .repo
            .revoke_if_active(session_id, now)
            .await?
            .ok_or(AccessError::InvalidRefreshToken)?;

        self.create(&consumed.principal_id, consumed.client, consumed.mfa_verified)
            .await
    }

    /// Revokes the session the access token belongs to and returns its claims.
    pub async fn revoke_by_access_token(&self, token: &str) -> Result<PrincipalClaims, AccessError> {
        let now = self.clock.now();
        let (claims, _) = self.authenticate_access(token, now).await?;
        self.repo
            .revoke_if_active(claims.sid, now)
            .await?
            .ok_or(AccessError::InvalidToken)?;
        Ok(claims)
    }

    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, AccessError> {
        Ok(self
            .repo
            .revoke_if_active(session_id, self.clock.now())
            .await?
            .is_some())
    }

    /// Revokes every active session of the principal except `keep`.
    pub async fn revoke_all(
        &self,
        principal_id: &str,
        keep: Option<Uuid>,
    ) -> Result<Vec<Uuid>, AccessError> {
        let now = self.clock.now();
        let mut revoked = Vec::new();
        for session in self.repo.list_for_principal(principal_id).await? {
            if Some(session.session_id) == keep {
                continue;
            }
            if self.repo.revoke_if_active(session.session_id, now).await?.is_some() {
                revoked.push(session.session_id);
            }
        }
        if !revoked.is_empty() {
            tracing::info!(
                principal_id = %principal_id,
                revoked = revoked.len(),
                "Revoked sessions"
            );
        }
        Ok(revoked)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>, AccessError> {
        Ok(self.repo.get(session_id).await?)
    }

    pub async fn mark_mfa_verified(&self, session_id: Uuid) -> Result<bool, AccessError> {
        Ok(self
            .repo
            .mark_mfa_verified(session_id, self.clock.now())
            .await?)
    }

    /// Active sessions, oldest first.
    pub async fn list_sessions(&self, principal_id: &str) -> Result<Vec<SessionInfo>, AccessError> {
        let now = self.clock.now();
        Ok(self
            .repo
            .list_for_principal(principal_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .map(SessionInfo::from)
            .collect())
    }

    pub async fn purge_expired(&self) -> Result<usize, AccessError> {
        Ok(self.repo.purge(self.clock.now()).await?)
    }

    async fn authenticate_access(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(PrincipalClaims, Session), AccessError> {
        let claims = self.tokens.decode_access_token(token)?;
        let session = self
            .repo
            .get(claims.sid)
            .await?
            .ok_or(AccessError::InvalidToken)?;

        if session.principal_id != claims.sub
            || !constant_time_eq(&hash_token(token), &session.access_token_hash)
        {
            return Err(AccessError::InvalidToken);
        }
        match session.state_at(now) {
            SessionState::Active => Ok((claims, session)),
            SessionState::Expired => Err(AccessError::SessionExpired),
            SessionState::Revoked => Err(AccessError::InvalidToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemorySessionRepository;
    use secrecy::Secret;

    fn store(policy: SessionPolicy) -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tokens =
            TokenService::new(&Secret::new("session-test-signing-secret-0123456789".to_string())).unwrap();
        let store = SessionStore::new(
            Arc::new(InMemorySessionRepository::new()),
            tokens,
            policy,
            clock.clone(),
        );
        (store, clock)
    }

    fn policy(extend_on_activity: bool, single_session: bool) -> SessionPolicy {
        SessionPolicy {
            duration: Duration::minutes(30),
            extend_on_activity,
            single_session,
        }
    }

    fn client() -> ClientContext {
        ClientContext::new("10.0.0.1", "test-agent")
    }

    #[tokio::test]
    async fn test_expiry_is_checked_on_validation() {
        let (store, clock) = store(policy(false, false));
        let issued = store.create("u1", client(), false).await.unwrap();

        let claims = store.validate_token(&issued.tokens.access_token).await.unwrap();
        assert_eq!(claims.sub, "u1");

        clock.advance(Duration::minutes(31));
        assert!(matches!(
            store.validate_token(&issued.tokens.access_token).await,
            Err(AccessError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_activity_extends_expiry() {
        let (store, clock) = store(policy(true, false));
        let issued = store.create("u1", client(), false).await.unwrap();

        clock.advance(Duration::minutes(20));
        store.validate_token(&issued.tokens.access_token).await.unwrap();
        clock.advance(Duration::minutes(20));
        store.validate_token(&issued.tokens.access_token).await.unwrap();

        let session = store.get(issued.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.expires_at, clock.now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_single_session_evicts_previous() {
        let (store, _) = store(policy(true, true));
        let first = store.create("u1", client(), false).await.unwrap();
        let second = store.create("u1", client(), false).await.unwrap();

        assert_eq!(second.evicted, vec![first.session.session_id]);
        assert!(matches!(
            store.validate_token(&first.tokens.access_token).await,
            Err(AccessError::InvalidToken)
        ));
        store.validate_token(&second.tokens.access_token).await.unwrap();
        assert_eq!(store.list_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let (store, _) = store(policy(true, false));
        let issued = store.create("u1", client(), true).await.unwrap();

        let rotated = store.refresh(&issued.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.session.session_id, issued.session.session_id);
        assert!(rotated.session.mfa_verified);

        assert!(matches!(
            store.refresh(&issued.tokens.refresh_token).await,
            Err(AccessError::InvalidRefreshToken)
        ));
        assert!(matches!(
            store.validate_token(&issued.tokens.access_token).await,
            Err(AccessError::InvalidToken)
        ));
        store.validate_token(&rotated.tokens.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_after_expiry_is_rejected() {
        let (store, clock) = store(policy(false, false));
        let issued = store.create("u1", client(), false).await.unwrap();

        clock.advance(Duration::minutes(31));
        assert!(matches!(
            store.refresh(&issued.tokens.refresh_token).await,
            Err(AccessError::InvalidRefreshToken)
        ));
        assert!(store.list_sessions("u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_creates_leave_one_session() {
        let (store, _) = store(policy(true, true));
        let creates: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create("u1", client(), false).await })
            })
            .collect();

        let mut evicted = 0;
        for create in creates {
            evicted += create.await.unwrap().unwrap().evicted.len();
        }
        assert_eq!(store.list_sessions("u1").await.unwrap().len(), 1);
        assert_eq!(evicted, 15);
    }

    #[tokio::test]
    async fn test_refresh_token_must_match_hash() {
        let (store, _) = store(policy(true, false));
        let issued = store.create("u1", client(), false).await.unwrap();
        let forged = format!("{}.{}", issued.session.session_id, "00");
        assert!(matches!(
            store.refresh(&forged).await,
            Err(AccessError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_purge_compacts() {
        let (store, _) = store(policy(true, false));
        let issued = store.create("u1", client(), false).await.unwrap();

        let claims = store
            .revoke_by_access_token(&issued.tokens.access_token)
            .await
            .unwrap();
        assert_eq!(claims.sid, issued.session.session_id);
        assert!(store.validate_token(&issued.tokens.access_token).await.is_err());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get(issued.session.session_id).await.unwrap().is_none());
    }
}
