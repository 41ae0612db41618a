//! MFA method model - per-principal secondary factors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Secondary-factor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaKind {
    /// Time-based one-time code (authenticator app).
    Totp,
    /// Out-of-band code delivered by SMS.
    Sms,
    /// Out-of-band code delivered by email.
    Email,
    /// Counter-based hardware token.
    HardwareToken,
}

impl MfaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaKind::Totp => "totp",
            MfaKind::Sms => "sms",
            MfaKind::Email => "email",
            MfaKind::HardwareToken => "hardware_token",
        }
    }

    pub fn is_out_of_band(&self) -> bool {
        matches!(self, MfaKind::Sms | MfaKind::Email)
    }
}

impl fmt::Display for MfaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method-specific secret material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MfaSecret {
    Totp {
        secret_hex: String,
        /// Last accepted time step, to refuse replays.
        last_step: Option<i64>,
    },
    Hotp {
        secret_hex: String,
        counter: u64,
    },
    OutOfBand {
        code_hash: Option<String>,
        code_expires_at: Option<DateTime<Utc>>,
    },
}

impl fmt::Debug for MfaSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MfaSecret::Totp { last_step, .. } => f
                .debug_struct("Totp")
                .field("last_step", last_step)
                .finish_non_exhaustive(),
            MfaSecret::Hotp { counter, .. } => f
                .debug_struct("Hotp")
                .field("counter", counter)
                .finish_non_exhaustive(),
            MfaSecret::OutOfBand {
                code_expires_at, ..
            } => f
                .debug_struct("OutOfBand")
                .field("code_expires_at", code_expires_at)
                .finish_non_exhaustive(),
        }
    }
}

/// MFA method entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaMethod {
    pub principal_id: String,
    pub kind: MfaKind,
    pub enabled: bool,
    pub verified: bool,
    pub secret: MfaSecret,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl MfaMethod {
    /// A pending (unverified, disabled) enrollment.
    pub fn pending(
        principal_id: impl Into<String>,
        kind: MfaKind,
        secret: MfaSecret,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            kind,
            enabled: false,
            verified: false,
            secret,
            created_at,
            verified_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.verified
    }
}

/// What the caller needs to finish an enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct MfaEnrollment {
    pub kind: MfaKind,
    /// Hex shared secret to provision an authenticator or hardware token.
    pub shared_secret: Option<String>,
    /// First out-of-band code, handed to the delivery collaborator.
    pub challenge_code: Option<String>,
}

/// Method info safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct MfaMethodInfo {
    pub kind: MfaKind,
    pub enabled: bool,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<MfaMethod> for MfaMethodInfo {
    fn from(m: MfaMethod) -> Self {
        Self {
            kind: m.kind,
            enabled: m.enabled,
            verified: m.verified,
            created_at: m.created_at,
            verified_at: m.verified_at,
        }
    }
}
