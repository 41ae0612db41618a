use service_core::error::AppError;
use thiserror::Error;

use crate::models::Permission;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Access denied: missing permission {permission} on {resource}")]
    AccessDenied {
        resource: String,
        permission: Permission,
    },

    #[error("Account locked, retry after {retry_after_secs} seconds")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session expired")]
    SessionExpired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Duplicate role: {0}")]
    DuplicateRole(String),

    #[error("Role inheritance cycle: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),

    #[error("MFA method already enrolled: {0}")]
    AlreadyEnrolled(String),

    #[error("MFA method not enrolled: {0}")]
    MfaNotEnrolled(String),

    #[error("Principal already exists")]
    PrincipalExists,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    /// Role graph problems. These abort startup.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AccessError::UnknownRole(_) | AccessError::DuplicateRole(_) | AccessError::InheritanceCycle(_)
        )
    }

    /// Failures worth a security review rather than a plain client error.
    pub fn is_security_incident(&self) -> bool {
        matches!(
            self,
            AccessError::AccountLocked { .. }
                | AccessError::AuthenticationFailed
                | AccessError::InvalidToken
                | AccessError::InvalidRefreshToken
        )
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            e @ AccessError::AccessDenied { .. } => AppError::Forbidden(anyhow::anyhow!(e.to_string())),
            AccessError::AccountLocked { retry_after_secs } => AppError::TooManyRequests(
                "Account temporarily locked".to_string(),
                Some(retry_after_secs),
            ),
            AccessError::InvalidCredentials => AppError::AuthError(anyhow::anyhow!("Invalid credentials")),
            AccessError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            AccessError::InvalidRefreshToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid refresh token"))
            }
            AccessError::SessionExpired => AppError::Unauthorized(anyhow::anyhow!("Session expired")),
            AccessError::AuthenticationFailed => {
                AppError::BadRequest(anyhow::anyhow!("Authentication failed"))
            }
            e @ (AccessError::UnknownRole(_)
            | AccessError::DuplicateRole(_)
            | AccessError::InheritanceCycle(_)) => AppError::ConfigError(anyhow::anyhow!(e.to_string())),
            AccessError::AlreadyEnrolled(kind) => {
                AppError::Conflict(anyhow::anyhow!("MFA method already enrolled: {}", kind))
            }
            AccessError::MfaNotEnrolled(kind) => {
                AppError::NotFound(anyhow::anyhow!("MFA method not enrolled: {}", kind))
            }
            AccessError::PrincipalExists => AppError::Conflict(anyhow::anyhow!("Principal already exists")),
            AccessError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            AccessError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = AccessError::InheritanceCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Role inheritance cycle: a -> b -> a");
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_lockout_maps_to_retry_after() {
        let app: AppError = AccessError::AccountLocked { retry_after_secs: 42 }.into();
        assert_eq!(app.retry_after(), Some(42));
        assert!(AccessError::AccountLocked { retry_after_secs: 1 }.is_security_incident());
    }

    #[test]
    fn test_config_errors_stay_fatal() {
        let app: AppError = AccessError::UnknownRole("ghost".into()).into();
        assert!(app.is_fatal());

        let app: AppError = AccessError::InvalidCredentials.into();
        assert!(!app.is_fatal());
    }
}
