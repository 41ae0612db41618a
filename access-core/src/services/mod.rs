//! Services layer of the access core.
//!
//! Authorization (registry, resolver, validator, assignment), authentication
//! (login guard, sessions, MFA), the credential vault and the audit trail.

pub mod access_validator;
pub mod assignment;
pub mod audit;
pub mod auth;
pub mod error;
pub mod login_guard;
pub mod metrics;
pub mod mfa;
pub mod notifier;
pub mod permission_resolver;
pub mod role_registry;
pub mod session;
pub mod token;
pub mod vault;

pub use access_validator::{AccessValidator, SYSTEM_RESOURCE};
pub use assignment::RoleAssignment;
pub use audit::AuditLog;
pub use auth::{AuthService, AuthenticationResult};
pub use error::AccessError;
pub use login_guard::{FailureOutcome, LoginGuard, LoginGuardPolicy};
pub use mfa::MfaManager;
pub use notifier::{RecordingNotifier, SecurityNotifier, TracingNotifier};
pub use permission_resolver::PermissionResolver;
pub use role_registry::RoleRegistry;
pub use session::{IssuedSession, SessionPolicy, SessionStore};
pub use token::{PrincipalClaims, TokenPair, TokenService};
pub use vault::{CredentialVault, KdfParams};
