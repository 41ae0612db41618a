//! Shared setup for access-core integration tests.
//!
//! Every core runs against in-memory stores, a manual clock and a recording
//! notifier so tests can move time and observe escalations.

#![allow(dead_code)]

use access_core::models::{AuditAction, AuditEvent, ClientContext};
use access_core::services::{
    KdfParams, LoginGuardPolicy, RecordingNotifier, SessionPolicy,
};
use access_core::{AccessCore, AccessCoreBuilder, ManualClock};
use chrono::Duration;
use secrecy::Secret;
use std::sync::Arc;

pub const TEST_SIGNING_SECRET: &str = "integration-test-signing-secret-0123456789";
pub const TEST_VAULT_SECRET: &str = "integration-test-vault-master";
pub const ADMIN_IDENTIFIER: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

pub struct TestCore {
    pub core: Arc<AccessCore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin_id: String,
}

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn client() -> ClientContext {
    ClientContext::new("203.0.113.7", "integration-test/1.0")
}

pub fn builder(clock: Arc<ManualClock>, notifier: Arc<RecordingNotifier>) -> AccessCoreBuilder {
    AccessCoreBuilder::new(
        Secret::new(TEST_SIGNING_SECRET.to_string()),
        Secret::new(TEST_VAULT_SECRET.to_string()),
    )
    .kdf_params(fast_kdf())
    .clock(clock)
    .notifier(notifier)
    .session_policy(SessionPolicy {
        duration: Duration::minutes(30),
        extend_on_activity: true,
        single_session: false,
    })
    .login_policy(LoginGuardPolicy {
        max_attempts: 3,
        lockout_duration: Duration::minutes(15),
    })
}

pub async fn setup() -> TestCore {
    setup_with(|b| b).await
}

/// Builds a core, lets the caller adjust the builder, and provisions an
/// administrator through the bootstrap path.
pub async fn setup_with(adjust: impl FnOnce(AccessCoreBuilder) -> AccessCoreBuilder) -> TestCore {
    let clock = Arc::new(ManualClock::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let core = adjust(builder(clock.clone(), notifier.clone()))
        .build()
        .expect("Failed to build access core");
    let core = Arc::new(core);

    let admin_id = core
        .bootstrap_admin(ADMIN_IDENTIFIER, &Secret::new(ADMIN_PASSWORD.to_string()))
        .await
        .expect("Failed to bootstrap admin");

    TestCore {
        core,
        clock,
        notifier,
        admin_id,
    }
}

impl TestCore {
    /// Polls the recording notifier until an event with `action` shows up.
    /// Escalations are delivered from a spawned task, so they lag the call
    /// that produced them.
    pub async fn notified(&self, action: AuditAction) -> Option<AuditEvent> {
        for _ in 0..100 {
            if let Some(event) = self
                .notifier
                .events()
                .into_iter()
                .find(|e| e.action == action.as_str())
            {
                return Some(event);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        None
    }
}
