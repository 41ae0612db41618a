//! Principal credential and login-attempt models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Login credentials for a principal.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub principal_id: String,
    /// Login identifier (email or handle).
    pub identifier: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PrincipalRecord {
    pub fn new(identifier: impl Into<String>, password_hash: String, created_at: DateTime<Utc>) -> Self {
        Self {
            principal_id: Uuid::new_v4().to_string(),
            identifier: identifier.into(),
            password_hash,
            created_at,
        }
    }
}

impl std::fmt::Debug for PrincipalRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalRecord")
            .field("principal_id", &self.principal_id)
            .field("identifier", &self.identifier)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Failed-login bookkeeping for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempts {
    pub failed_attempts: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginAttempts {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }

    /// A lockout whose window has passed clears the counter.
    pub fn lockout_elapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until <= now)
    }
}

/// Outcome of counting a login attempt before its password is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptReservation {
    /// The attempt may be evaluated. `locks_until` is set when this attempt
    /// used up the last one allowed.
    Allowed {
        attempts: u32,
        locks_until: Option<DateTime<Utc>>,
    },
    /// Already locked; nothing was counted.
    Locked { until: DateTime<Utc> },
}
