use chrono::Duration;
use cliqsafe::{
    clock::ManualClock,
    config::WorkflowConfig,
    models::TokenKind,
    services::{TokenError, TokenStore},
    test_utils::test_helpers,
};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_see_exactly_one_success() {
    let (pool, _file) = test_helpers::create_test_db_file().await.unwrap();
    let clock = ManualClock::starting_now();
    let store = TokenStore::new(pool, Arc::new(clock), WorkflowConfig::default());

    let issued = store
        .issue(TokenKind::ApprovalLink, 42, None, None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let secret = issued.raw_secret.clone();
        handles.push(tokio::spawn(async move {
            store.consume(TokenKind::ApprovalLink, &secret, None).await
        }));
    }

    let mut successes = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(consumed) => {
                assert_eq!(consumed.subject_id, 42);
                successes += 1;
            }
            Err(TokenError::AlreadyUsed) => already_used += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(already_used, 9);
}

#[tokio::test]
async fn expired_token_is_rejected_even_if_never_used() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let clock = ManualClock::starting_now();
    let store = TokenStore::new(pool, Arc::new(clock.clone()), WorkflowConfig::default());

    let issued = store
        .issue(TokenKind::MagicLink, 7, None, None)
        .await
        .unwrap();
    clock.advance(Duration::minutes(16));

    let result = store
        .consume(TokenKind::MagicLink, &issued.raw_secret, None)
        .await;
    assert!(matches!(result, Err(TokenError::Expired)));
}

#[tokio::test]
async fn token_is_usable_up_to_its_expiry_instant() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let clock = ManualClock::starting_now();
    let store = TokenStore::new(pool, Arc::new(clock.clone()), WorkflowConfig::default());

    let issued = store
        .issue(TokenKind::InviteCode, 3, Some(11), Some(Duration::hours(1)))
        .await
        .unwrap();
    clock.advance(Duration::hours(1));

    let consumed = store
        .consume(TokenKind::InviteCode, &issued.raw_secret, Some(11))
        .await
        .unwrap();
    assert_eq!(consumed.context_id, Some(11));
}

#[tokio::test]
async fn unknown_secret_is_not_found() {
    let pool = test_helpers::create_test_db().await.unwrap();
    let store = TokenStore::new(
        pool,
        Arc::new(ManualClock::starting_now()),
        WorkflowConfig::default(),
    );

    let result = store
        .consume(TokenKind::ApprovalLink, "deadbeef", None)
        .await;
    assert!(matches!(result, Err(TokenError::NotFound)));
}
