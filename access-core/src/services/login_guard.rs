//! Brute-force protection keyed by login identifier.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::error::AccessError;
use crate::clock::Clock;
use crate::models::AttemptReservation;
use crate::store::LockoutRepository;

#[derive(Debug, Clone, Copy)]
pub struct LoginGuardPolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LoginGuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { attempts: u32 },
    /// The threshold is reached; further attempts wait for `until`.
    Locked { until: DateTime<Utc> },
}

/// Lockouts are stored as a `locked_until` timestamp and compared against the
/// clock on every check, so nothing has to fire when the window ends.
#[derive(Clone)]
pub struct LoginGuard {
    repo: Arc<dyn LockoutRepository>,
    policy: LoginGuardPolicy,
    clock: Arc<dyn Clock>,
}

impl LoginGuard {
    pub fn new(repo: Arc<dyn LockoutRepository>, policy: LoginGuardPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { repo, policy, clock }
    }

    pub fn policy(&self) -> LoginGuardPolicy {
        self.policy
    }

    pub async fn is_locked(&self, identifier: &str) -> Result<bool, AccessError> {
        let attempts = self.repo.get(identifier).await?;
        Ok(attempts.is_locked_at(self.clock.now()))
    }

    /// Whole seconds until the lockout ends, rounded up.
    pub async fn retry_after(&self, identifier: &str) -> Result<Option<u64>, AccessError> {
        let now = self.clock.now();
        let attempts = self.repo.get(identifier).await?;
        Ok(attempts
            .locked_until
            .filter(|until| *until > now)
            .map(|until| self.seconds_until(until)))
    }

    pub fn seconds_until(&self, until: DateTime<Utc>) -> u64 {
        let millis = (until - self.clock.now()).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }

    /// Counts an attempt before its password is checked. Concurrent callers
    /// past the threshold see `Locked`, so at most `max_attempts` guesses are
    /// ever evaluated per window. A later `record_success` settles the count.
    pub async fn reserve(&self, identifier: &str) -> Result<AttemptReservation, AccessError> {
        let reservation = self
            .repo
            .reserve_attempt(
                identifier,
                self.clock.now(),
                self.policy.max_attempts,
                self.policy.lockout_duration,
            )
            .await?;

        match reservation {
            AttemptReservation::Allowed {
                attempts,
                locks_until: Some(until),
            } => tracing::warn!(
                identifier = %identifier,
                attempts,
                locked_until = %until,
                "Login locked after repeated attempts"
            ),
            AttemptReservation::Allowed { attempts, .. } => {
                tracing::debug!(identifier = %identifier, attempts, "Login attempt counted")
            }
            AttemptReservation::Locked { .. } => {}
        }
        Ok(reservation)
    }

    /// Counts a failure that did not go through `reserve` first.
    pub async fn record_failure(&self, identifier: &str) -> Result<FailureOutcome, AccessError> {
        Ok(match self.reserve(identifier).await? {
            AttemptReservation::Allowed {
                locks_until: Some(until),
                ..
            }
            | AttemptReservation::Locked { until } => FailureOutcome::Locked { until },
            AttemptReservation::Allowed { attempts, .. } => FailureOutcome::Counted { attempts },
        })
    }

    pub async fn record_success(&self, identifier: &str) -> Result<(), AccessError> {
        self.repo.clear(identifier).await?;
        Ok(())
    }
}
