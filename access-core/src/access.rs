//! The service container: every component wired once at startup and shared
//! behind an `Arc`.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::AccessConfig;
use crate::models::{
    AuditAction, AuditEvent, AuditQuery, ClientContext, MfaEnrollment, MfaKind, MfaMethodInfo,
    Permission, PrincipalRecord, RoleGrant, SessionInfo, Severity, ROLE_ADMIN,
};
use crate::services::{
    AccessError, AccessValidator, AuditLog, AuthService, AuthenticationResult, CredentialVault,
    KdfParams, LoginGuard, LoginGuardPolicy, MfaManager, PermissionResolver, PrincipalClaims,
    RoleAssignment, RoleRegistry, SecurityNotifier, SessionPolicy, SessionStore, TokenService,
    TracingNotifier,
};
use crate::store::Stores;
use crate::utils::Password;

/// Resource name guarding audit log reads.
pub const AUDIT_LOG_RESOURCE: &str = "audit_log";
const VAULT_RESOURCE: &str = "vault";

const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// What a reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub grants: usize,
    pub sessions: usize,
    pub cached_permissions: usize,
}

pub struct AccessCoreBuilder {
    token_secret: Secret<String>,
    vault_secret: Secret<String>,
    kdf: KdfParams,
    session_policy: SessionPolicy,
    login_policy: LoginGuardPolicy,
    audit_capacity: usize,
    clock: Option<Arc<dyn Clock>>,
    registry: Option<RoleRegistry>,
    stores: Option<Stores>,
    notifier: Option<Arc<dyn SecurityNotifier>>,
}

impl AccessCoreBuilder {
    pub fn new(token_secret: Secret<String>, vault_secret: Secret<String>) -> Self {
        Self {
            token_secret,
            vault_secret,
            kdf: KdfParams::default(),
            session_policy: SessionPolicy::default(),
            login_policy: LoginGuardPolicy::default(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            clock: None,
            registry: None,
            stores: None,
            notifier: None,
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(
            Secret::new(config.token_signing_secret.expose_secret().clone()),
            Secret::new(config.vault.master_secret.expose_secret().clone()),
        )
        .kdf_params(config.kdf_params())
        .session_policy(config.session_policy())
        .login_policy(config.login_policy())
        .audit_capacity(config.audit_max_events)
    }

    pub fn kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    pub fn login_policy(mut self, policy: LoginGuardPolicy) -> Self {
        self.login_policy = policy;
        self
    }

    /// Ignored when explicit stores are supplied.
    pub fn audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the default role ladder.
    pub fn registry(mut self, registry: RoleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn SecurityNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Wires every component. The role graph is validated here so a dangling
    /// or cyclic definition stops the process before it serves anything.
    pub fn build(self) -> Result<AccessCore, AccessError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registry = match self.registry {
            Some(registry) => registry,
            None => RoleRegistry::with_default_roles()?,
        };
        registry.validate_graph()?;
        let registry = Arc::new(registry);

        let stores = self
            .stores
            .unwrap_or_else(|| Stores::in_memory(self.audit_capacity));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let audit = AuditLog::new(stores.audit.clone(), notifier);
        let resolver = Arc::new(PermissionResolver::new(
            registry.clone(),
            stores.grants.clone(),
            clock.clone(),
        ));
        let validator = AccessValidator::new(resolver.clone(), audit.clone(), clock.clone());
        let assignment = RoleAssignment::new(
            stores.grants.clone(),
            resolver.clone(),
            validator.clone(),
            audit.clone(),
            clock.clone(),
        );

        let tokens = TokenService::new(&self.token_secret)?;
        let sessions = SessionStore::new(
            stores.sessions.clone(),
            tokens,
            self.session_policy,
            clock.clone(),
        );
        let guard = LoginGuard::new(stores.lockouts.clone(), self.login_policy, clock.clone());
        let mfa = MfaManager::new(stores.mfa.clone(), clock.clone());
        let auth = AuthService::new(
            stores.credentials.clone(),
            guard,
            sessions,
            mfa,
            audit.clone(),
            clock.clone(),
        );
        let vault = CredentialVault::new(self.vault_secret, self.kdf)?;

        tracing::info!(roles = registry.names().len(), "Access core initialized");
        Ok(AccessCore {
            clock,
            registry,
            resolver,
            validator,
            assignment,
            auth,
            vault,
            audit,
            stores,
        })
    }
}

pub struct AccessCore {
    clock: Arc<dyn Clock>,
    registry: Arc<RoleRegistry>,
    resolver: Arc<PermissionResolver>,
    validator: AccessValidator,
    assignment: RoleAssignment,
    auth: AuthService,
    vault: CredentialVault,
    audit: AuditLog,
    stores: Stores,
}

impl AccessCore {
    pub fn builder(token_secret: Secret<String>, vault_secret: Secret<String>) -> AccessCoreBuilder {
        AccessCoreBuilder::new(token_secret, vault_secret)
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    // Authorization

    pub async fn assign_role(
        &self,
        actor_id: &str,
        target_id: &str,
        role: &str,
        scope: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RoleGrant, AccessError> {
        self.assignment
            .assign_role(actor_id, target_id, role, scope, expires_at)
            .await
    }

    pub async fn revoke_role(
        &self,
        actor_id: &str,
        target_id: &str,
        role: &str,
    ) -> Result<Vec<RoleGrant>, AccessError> {
        self.assignment.revoke_role(actor_id, target_id, role).await
    }

    pub async fn validate(
        &self,
        principal_id: &str,
        resource: &str,
        permission: Permission,
    ) -> Result<(), AccessError> {
        self.validator.validate(principal_id, resource, permission).await
    }

    pub async fn validate_resource(
        &self,
        principal_id: &str,
        resource: &str,
        resource_id: &str,
        permission: Permission,
    ) -> Result<(), AccessError> {
        self.validator
            .validate_resource(principal_id, resource, resource_id, permission)
            .await
    }

    pub async fn effective_permissions(&self, principal_id: &str) -> Result<BTreeSet<Permission>, AccessError> {
        let permissions = self.resolver.effective_permissions(principal_id).await?;
        Ok(permissions.as_ref().clone())
    }

    pub async fn accessible_resources(
        &self,
        principal_id: &str,
        permission: Permission,
    ) -> Result<BTreeSet<String>, AccessError> {
        self.resolver.accessible_resources(principal_id, permission).await
    }

    // Authentication

    pub async fn register_principal(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<PrincipalRecord, AccessError> {
        self.auth
            .register_principal(identifier, Password::new(password))
            .await
    }

    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        client: ClientContext,
    ) -> Result<AuthenticationResult, AccessError> {
        self.auth
            .authenticate(identifier, Password::new(password), client)
            .await
    }

    pub async fn validate_token(&self, token: &str) -> Result<PrincipalClaims, AccessError> {
        self.auth.validate_token(token).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthenticationResult, AccessError> {
        self.auth.refresh(refresh_token).await
    }

    pub async fn logout(&self, access_token: &str) -> Result<(), AccessError> {
        self.auth.logout(access_token).await
    }

    /// Ends a session by id. Ending one that is already gone is not an error.
    pub async fn logout_session(&self, session_id: Uuid) -> Result<(), AccessError> {
        self.auth.logout_session(session_id).await
    }

    pub async fn logout_all(&self, principal_id: &str) -> Result<Vec<Uuid>, AccessError> {
        self.auth.logout_all(principal_id).await
    }

    pub async fn list_sessions(&self, principal_id: &str) -> Result<Vec<SessionInfo>, AccessError> {
        self.auth.sessions().list_sessions(principal_id).await
    }

    // Second factor

    pub async fn enroll_mfa(&self, principal_id: &str, kind: MfaKind) -> Result<MfaEnrollment, AccessError> {
        self.auth.enroll_mfa(principal_id, kind).await
    }

    pub async fn issue_mfa_challenge(&self, principal_id: &str, kind: MfaKind) -> Result<String, AccessError> {
        self.auth.issue_mfa_challenge(principal_id, kind).await
    }

    pub async fn verify_mfa(&self, principal_id: &str, kind: MfaKind, code: &str) -> Result<bool, AccessError> {
        self.auth.verify_mfa(principal_id, kind, code).await
    }

    pub async fn verify_session_mfa(
        &self,
        session_id: Uuid,
        kind: MfaKind,
        code: &str,
    ) -> Result<bool, AccessError> {
        self.auth.verify_session_mfa(session_id, kind, code).await
    }

    pub async fn remove_mfa(&self, principal_id: &str, kind: MfaKind) -> Result<bool, AccessError> {
        self.auth.remove_mfa(principal_id, kind).await
    }

    pub async fn mfa_methods(&self, principal_id: &str) -> Result<Vec<MfaMethodInfo>, AccessError> {
        self.auth.mfa().methods(principal_id).await
    }

    // Encryption at rest

    pub async fn encrypt_sensitive(&self, plaintext: &[u8]) -> Result<String, AccessError> {
        self.vault.encrypt(plaintext.to_vec()).await
    }

    /// A blob that fails authentication is treated as tampering and audited
    /// as critical.
    pub async fn decrypt_sensitive(&self, blob: &str) -> Result<Vec<u8>, AccessError> {
        match self.vault.decrypt(blob.to_string()).await {
            Err(AccessError::AuthenticationFailed) => {
                self.audit
                    .append(
                        AuditEvent::new(AuditAction::DecryptionFailed, VAULT_RESOURCE, self.clock.now())
                            .failure("authentication tag mismatch or malformed blob")
                            .severity(Severity::Critical),
                    )
                    .await?;
                Err(AccessError::AuthenticationFailed)
            }
            other => other,
        }
    }

    // Audit

    /// Requires `ViewAuditLog`. The check itself is audited like any other.
    pub async fn query_audit_log(
        &self,
        actor_id: &str,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, AccessError> {
        self.validator
            .validate(actor_id, AUDIT_LOG_RESOURCE, Permission::ViewAuditLog)
            .await?;
        self.audit.query(query).await
    }

    /// Chronological snapshot of the retained trail. Requires `ViewAuditLog`.
    pub async fn export_audit_log(&self, actor_id: &str) -> Result<Vec<AuditEvent>, AccessError> {
        self.validator
            .validate(actor_id, AUDIT_LOG_RESOURCE, Permission::ViewAuditLog)
            .await?;
        self.audit.export().await
    }

    // Lifecycle

    /// Creates the first administrator if the identifier is not registered
    /// yet. Returns the principal id either way.
    pub async fn bootstrap_admin(&self, identifier: &str, secret: &Secret<String>) -> Result<String, AccessError> {
        if let Some(existing) = self.stores.credentials.find_by_identifier(identifier).await? {
            tracing::info!(principal_id = %existing.principal_id, "Bootstrap admin already provisioned");
            return Ok(existing.principal_id);
        }

        let record = self
            .auth
            .register_principal(identifier, Password::new(secret.expose_secret().clone()))
            .await?;
        self.assignment
            .bootstrap_grant(&record.principal_id, ROLE_ADMIN)
            .await?;
        Ok(record.principal_id)
    }

    /// Compacts expired grants and dead sessions. Correctness never depends
    /// on this running; expiry is always checked at read time.
    pub async fn reap_expired(&self) -> Result<ReapReport, AccessError> {
        let now = self.clock.now();
        let report = ReapReport {
            grants: self.stores.grants.compact_expired(now).await?,
            sessions: self.auth.sessions().purge_expired().await?,
            cached_permissions: self.resolver.prune(now),
        };
        if report != ReapReport::default() {
            tracing::info!(
                grants = report.grants,
                sessions = report.sessions,
                cached_permissions = report.cached_permissions,
                "Reaped expired records"
            );
        }
        Ok(report)
    }

    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = core.reap_expired().await {
                    tracing::error!(error = %e, "Reaper pass failed");
                }
            }
        })
    }
}
