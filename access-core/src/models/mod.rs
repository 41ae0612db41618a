pub mod audit_event;
pub mod mfa_method;
pub mod permission;
pub mod principal;
pub mod role;
pub mod role_grant;
pub mod session;

pub use audit_event::{AuditAction, AuditEvent, AuditMetadata, AuditQuery, AuditStatus, Severity};
pub use mfa_method::{MfaEnrollment, MfaKind, MfaMethod, MfaMethodInfo, MfaSecret};
pub use permission::Permission;
pub use principal::{AttemptReservation, LoginAttempts, PrincipalRecord};
pub use role::{RoleDefinition, ROLE_ADMIN, ROLE_EDITOR, ROLE_MANAGER, ROLE_VIEWER};
pub use role_grant::RoleGrant;
pub use session::{ClientContext, Session, SessionInfo, SessionState};
