mod common;

use access_core::models::MfaKind;
use access_core::services::mfa::{generate_totp, TOTP_STEP_SECONDS};
use access_core::services::{LoginGuardPolicy, SessionPolicy};
use access_core::{AccessError, Clock};
use chrono::Duration;
use tokio::task::JoinSet;

const USER: &str = "robin@example.com";
const PASSWORD: &str = "parallel-safe-passphrase";

async fn setup_with_user(
    adjust: impl FnOnce(access_core::AccessCoreBuilder) -> access_core::AccessCoreBuilder,
) -> (common::TestCore, String) {
    let t = common::setup_with(adjust).await;
    let record = t.core.register_principal(USER, PASSWORD).await.unwrap();
    (t, record.principal_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_bad_logins_stop_at_threshold() {
    let (t, _) = setup_with_user(|b| b).await;

    let mut guesses = JoinSet::new();
    for i in 0..20 {
        let core = t.core.clone();
        guesses.spawn(async move {
            core.authenticate(USER, &format!("wrong-guess-{}", i), common::client())
                .await
        });
    }

    let (mut invalid, mut locked) = (0, 0);
    while let Some(outcome) = guesses.join_next().await {
        match outcome.unwrap() {
            Err(AccessError::InvalidCredentials) => invalid += 1,
            Err(AccessError::AccountLocked { .. }) => locked += 1,
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.principal_id)),
        }
    }
    // Only the attempts under the threshold ever reach the password check
    assert_eq!(invalid, 3);
    assert_eq!(locked, 17);

    assert!(matches!(
        t.core.authenticate(USER, PASSWORD, common::client()).await,
        Err(AccessError::AccountLocked { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_refreshes_rotate_once() {
    let (t, _) = setup_with_user(|b| b).await;
    let login = t.core.authenticate(USER, PASSWORD, common::client()).await.unwrap();

    let mut refreshes = JoinSet::new();
    for _ in 0..8 {
        let core = t.core.clone();
        let token = login.tokens.refresh_token.clone();
        refreshes.spawn(async move { core.refresh_token(&token).await });
    }

    let mut rotated = Vec::new();
    while let Some(outcome) = refreshes.join_next().await {
        match outcome.unwrap() {
            Ok(result) => rotated.push(result),
            Err(e) => assert!(matches!(e, AccessError::InvalidRefreshToken)),
        }
    }
    assert_eq!(rotated.len(), 1);
    t.core
        .validate_token(&rotated[0].tokens.access_token)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_totp_verifications_accept_once() {
    let (t, principal_id) = setup_with_user(|b| b).await;
    let enrollment = t.core.enroll_mfa(&principal_id, MfaKind::Totp).await.unwrap();
    let key = hex::decode(enrollment.shared_secret.unwrap()).unwrap();
    let code_now = |t: &common::TestCore| {
        let step = t.clock.now().timestamp().div_euclid(TOTP_STEP_SECONDS);
        generate_totp(&key, step).unwrap()
    };

    assert!(t
        .core
        .verify_mfa(&principal_id, MfaKind::Totp, &code_now(&t))
        .await
        .unwrap());

    t.clock.advance(Duration::seconds(TOTP_STEP_SECONDS));
    let code = code_now(&t);
    let mut checks = JoinSet::new();
    for _ in 0..2 {
        let core = t.core.clone();
        let principal_id = principal_id.clone();
        let code = code.clone();
        checks.spawn(async move { core.verify_mfa(&principal_id, MfaKind::Totp, &code).await });
    }

    let mut accepted = 0;
    while let Some(outcome) = checks.join_next().await {
        if outcome.unwrap().unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_logins_keep_a_single_session() {
    let (t, principal_id) = setup_with_user(|b| {
        b.session_policy(SessionPolicy {
            duration: Duration::minutes(30),
            extend_on_activity: true,
            single_session: true,
        })
        .login_policy(LoginGuardPolicy {
            max_attempts: 20,
            lockout_duration: Duration::minutes(15),
        })
    })
    .await;

    let mut logins = JoinSet::new();
    for _ in 0..8 {
        let core = t.core.clone();
        logins.spawn(async move { core.authenticate(USER, PASSWORD, common::client()).await });
    }
    while let Some(outcome) = logins.join_next().await {
        outcome.unwrap().unwrap();
    }

    assert_eq!(t.core.list_sessions(&principal_id).await.unwrap().len(), 1);
}
