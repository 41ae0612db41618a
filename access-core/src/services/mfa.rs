//! Second-factor enrollment and verification.
//!
//! Supported factors:
//! - TOTP (30 s step, 6 digits, one step of clock skew either way)
//! - hardware tokens speaking HOTP (look-ahead of 5 counter values)
//! - out-of-band SMS/email codes (hashed at rest, 10 minute lifetime, single use)
//!
//! All factors use HMAC-SHA256.

use chrono::Duration;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;

use super::error::AccessError;
use crate::clock::Clock;
use crate::models::{MfaEnrollment, MfaKind, MfaMethod, MfaMethodInfo, MfaSecret};
use crate::store::MfaRepository;
use crate::utils::{constant_time_eq, generate_random_token, hash_token};

type HmacSha256 = Hmac<Sha256>;

pub const CODE_DIGITS: usize = 6;
pub const TOTP_STEP_SECONDS: i64 = 30;
const TOTP_SKEW_STEPS: i64 = 1;
const HOTP_LOOK_AHEAD: u64 = 5;
const SHARED_SECRET_BYTES: usize = 20;

fn out_of_band_ttl() -> Duration {
    Duration::minutes(10)
}

/// RFC 4226 dynamic truncation over HMAC-SHA256.
pub fn generate_hotp(secret: &[u8], counter: u64) -> Result<String, AccessError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AccessError::Internal(anyhow::anyhow!("Invalid HMAC key: {}", e)))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(format!("{:0width$}", binary % 10u32.pow(CODE_DIGITS as u32), width = CODE_DIGITS))
}

/// RFC 6238 code for a given time step.
pub fn generate_totp(secret: &[u8], step: i64) -> Result<String, AccessError> {
    let counter = u64::try_from(step)
        .map_err(|_| AccessError::ValidationError("TOTP step must not be negative".to_string()))?;
    generate_hotp(secret, counter)
}

fn random_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..10u32.pow(CODE_DIGITS as u32));
    format!("{:0width$}", code, width = CODE_DIGITS)
}

fn well_formed(code: &str) -> bool {
    code.len() == CODE_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

fn decode_secret(secret_hex: &str) -> Result<Vec<u8>, AccessError> {
    hex::decode(secret_hex)
        .map_err(|e| AccessError::Internal(anyhow::anyhow!("Corrupt MFA secret: {}", e)))
}

#[derive(Clone)]
pub struct MfaManager {
    repo: Arc<dyn MfaRepository>,
    clock: Arc<dyn Clock>,
}

impl MfaManager {
    pub fn new(repo: Arc<dyn MfaRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Starts enrollment. The method stays disabled until the first
    /// successful [`MfaManager::verify`]; re-enrolling a pending method
    /// replaces it.
    #[tracing::instrument(skip(self))]
    pub async fn enroll(&self, principal_id: &str, kind: MfaKind) -> Result<MfaEnrollment, AccessError> {
        if let Some(existing) = self.repo.get(principal_id, kind).await? {
            if existing.enabled {
                return Err(AccessError::AlreadyEnrolled(kind.to_string()));
            }
        }

        let now = self.clock.now();
        let (secret, enrollment) = match kind {
            MfaKind::Totp | MfaKind::HardwareToken => {
                let secret_hex = generate_random_token(SHARED_SECRET_BYTES);
                let secret = if kind == MfaKind::Totp {
                    MfaSecret::Totp {
                        secret_hex: secret_hex.clone(),
                        last_step: None,
                    }
                } else {
                    MfaSecret::Hotp {
                        secret_hex: secret_hex.clone(),
                        counter: 0,
                    }
                };
                (
                    secret,
                    MfaEnrollment {
                        kind,
                        shared_secret: Some(secret_hex),
                        challenge_code: None,
                    },
                )
            }
            MfaKind::Sms | MfaKind::Email => {
                let code = random_code();
                (
                    MfaSecret::OutOfBand {
                        code_hash: Some(hash_token(&code)),
                        code_expires_at: Some(now + out_of_band_ttl()),
                    },
                    MfaEnrollment {
                        kind,
                        shared_secret: None,
                        challenge_code: Some(code),
                    },
                )
            }
        };

        self.repo
            .put(MfaMethod::pending(principal_id, kind, secret, now))
            .await?;
        tracing::info!(principal_id = %principal_id, kind = %kind, "MFA enrollment started");
        Ok(enrollment)
    }

    /// Issues a fresh out-of-band code, replacing any outstanding one. The
    /// caller is responsible for delivering it.
    pub async fn issue_challenge(&self, principal_id: &str, kind: MfaKind) -> Result<String, AccessError> {
        if !kind.is_out_of_band() {
            return Err(AccessError::ValidationError(format!(
                "{} does not use issued challenges",
                kind
            )));
        }
        let mut method = self
            .repo
            .get(principal_id, kind)
            .await?
            .ok_or_else(|| AccessError::MfaNotEnrolled(kind.to_string()))?;

        let code = random_code();
        method.secret = MfaSecret::OutOfBand {
            code_hash: Some(hash_token(&code)),
            code_expires_at: Some(self.clock.now() + out_of_band_ttl()),
        };
        self.repo.put(method).await?;
        tracing::debug!(principal_id = %principal_id, kind = %kind, "Issued MFA challenge");
        Ok(code)
    }

    /// Checks a code. The first success enables the method. Returns
    /// `Ok(false)` for a wrong, expired or replayed code.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify(&self, principal_id: &str, kind: MfaKind, code: &str) -> Result<bool, AccessError> {
        let method = self
            .repo
            .get(principal_id, kind)
            .await?
            .ok_or_else(|| AccessError::MfaNotEnrolled(kind.to_string()))?;
        let code = code.trim();
        if !well_formed(code) {
            return Ok(false);
        }

        let now = self.clock.now();
        let next_secret = match &method.secret {
            MfaSecret::Totp {
                secret_hex,
                last_step,
            } => {
                let key = decode_secret(secret_hex)?;
                let current = now.timestamp().div_euclid(TOTP_STEP_SECONDS);
                let mut matched = None;
                for step in current - TOTP_SKEW_STEPS..=current + TOTP_SKEW_STEPS {
                    // Codes from a step at or before the last accepted one are replays.
                    if last_step.is_some_and(|last| step <= last) {
                        continue;
                    }
                    if constant_time_eq(&generate_totp(&key, step)?, code) {
                        matched = Some(step);
                        break;
                    }
                }
                matched.map(|step| MfaSecret::Totp {
                    secret_hex: secret_hex.clone(),
                    last_step: Some(step),
                })
            }
            MfaSecret::Hotp {
                secret_hex,
                counter,
            } => {
                let key = decode_secret(secret_hex)?;
                let mut matched = None;
                for candidate in *counter..counter.saturating_add(HOTP_LOOK_AHEAD) {
                    if constant_time_eq(&generate_hotp(&key, candidate)?, code) {
                        matched = Some(candidate);
                        break;
                    }
                }
                matched.map(|candidate| MfaSecret::Hotp {
                    secret_hex: secret_hex.clone(),
                    counter: candidate + 1,
                })
            }
            MfaSecret::OutOfBand {
                code_hash,
                code_expires_at,
            } => {
                let live = code_expires_at.is_some_and(|at| at > now);
                let matches = code_hash
                    .as_deref()
                    .is_some_and(|hash| constant_time_eq(&hash_token(code), hash));
                (live && matches).then_some(MfaSecret::OutOfBand {
                    code_hash: None,
                    code_expires_at: None,
                })
            }
        };

        let Some(secret) = next_secret else {
            tracing::info!(principal_id = %principal_id, kind = %kind, "MFA code rejected");
            return Ok(false);
        };

        let mut next = method.clone();
        next.secret = secret;
        if !next.verified {
            next.verified = true;
            next.enabled = true;
            next.verified_at = Some(now);
        }

        // A concurrent verification consumed the same state first.
        if !self.repo.replace_if_unchanged(&method, next).await? {
            return Ok(false);
        }
        tracing::info!(principal_id = %principal_id, kind = %kind, "MFA code accepted");
        Ok(true)
    }

    pub async fn remove(&self, principal_id: &str, kind: MfaKind) -> Result<bool, AccessError> {
        Ok(self.repo.remove(principal_id, kind).await?)
    }

    pub async fn has_active_method(&self, principal_id: &str) -> Result<bool, AccessError> {
        Ok(self
            .repo
            .list(principal_id)
            .await?
            .iter()
            .any(MfaMethod::is_active))
    }

    pub async fn methods(&self, principal_id: &str) -> Result<Vec<MfaMethodInfo>, AccessError> {
        Ok(self
            .repo
            .list(principal_id)
            .await?
            .into_iter()
            .map(MfaMethodInfo::from)
            .collect())
    }
}
