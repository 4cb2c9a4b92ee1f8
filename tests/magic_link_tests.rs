use chrono::Duration;
use cliqsafe::{
    clock::ManualClock,
    config::WorkflowConfig,
    services::AuthTokenError,
    test_utils::test_helpers::{self, RecordingEmailSender},
    AppState,
};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_logins_with_one_link_admit_a_single_session() {
    let (pool, _file) = test_helpers::create_test_db_file().await.unwrap();
    let account_id = test_helpers::insert_account(&pool, Some("adult@example.com"), "adult")
        .await
        .unwrap();
    let mail = Arc::new(RecordingEmailSender::new());
    let state = AppState::new(
        pool,
        Arc::new(ManualClock::starting_now()),
        mail.clone(),
        WorkflowConfig::default(),
    );

    state
        .auth_token_service
        .request_magic_link("adult@example.com")
        .await
        .unwrap();
    let secret = mail.last_secret_after("/auth/magic/").unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = state.auth_token_service.clone();
        let secret = secret.clone();
        handles.push(tokio::spawn(async move {
            service.verify_magic_link(&secret).await
        }));
    }

    let mut sessions = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok((account, session)) => {
                assert_eq!(account.id, account_id);
                sessions.push(session);
            }
            Err(AuthTokenError::TokenAlreadyUsed) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(sessions.len(), 1);
    assert_eq!(rejected, 7);
    assert_eq!(sessions[0].user_id, account_id);
}

#[tokio::test]
async fn unknown_email_gets_no_link() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let mail = Arc::new(RecordingEmailSender::new());
    let state = AppState::new(
        pool,
        Arc::new(ManualClock::starting_now()),
        mail.clone(),
        WorkflowConfig::default(),
    );

    state
        .auth_token_service
        .request_magic_link("nobody@example.com")
        .await
        .unwrap();

    assert!(mail.sent().is_empty());
}

#[tokio::test]
async fn magic_link_expires_after_its_lifetime() {
    let pool = test_helpers::create_test_db().await.unwrap();
    test_helpers::insert_account(&pool, Some("parent@example.com"), "parent")
        .await
        .unwrap();
    let clock = ManualClock::starting_now();
    let mail = Arc::new(RecordingEmailSender::new());
    let state = AppState::new(
        pool,
        Arc::new(clock.clone()),
        mail.clone(),
        WorkflowConfig::default(),
    );

    state
        .auth_token_service
        .request_magic_link("Parent@Example.com")
        .await
        .unwrap();
    let secret = mail.last_secret_after("/auth/magic/").unwrap();
    assert_eq!(mail.sent()[0].to, "parent@example.com");

    clock.advance(Duration::minutes(16));
    let result = state.auth_token_service.verify_magic_link(&secret).await;
    assert!(matches!(result, Err(AuthTokenError::TokenExpired)));
}

#[tokio::test]
async fn session_lasts_for_configured_lifetime() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let account_id = test_helpers::insert_account(&pool, Some("adult@example.com"), "adult")
        .await
        .unwrap();
    let clock = ManualClock::starting_now();
    let config = WorkflowConfig {
        session_lifetime: Duration::hours(2),
        ..WorkflowConfig::default()
    };
    let state = AppState::new(
        pool,
        Arc::new(clock.clone()),
        Arc::new(RecordingEmailSender::new()),
        config,
    );

    let secret = state
        .auth_token_service
        .issue_magic_link(account_id)
        .await
        .unwrap();
    let (_, session) = state
        .auth_token_service
        .verify_magic_link(&secret)
        .await
        .unwrap();

    clock.advance(Duration::hours(2));
    assert!(session.is_active_at(cliqsafe::clock::Clock::now(&clock)));
    clock.advance(Duration::seconds(1));
    assert!(!session.is_active_at(cliqsafe::clock::Clock::now(&clock)));
}
