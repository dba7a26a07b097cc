mod common;

use chrono::{Duration, Utc};
use interfaces::defs::{Cookie, SessionRecord, SessionToken};
use interfaces::state::SessionStore;
use tracing::info;
use uuid::Uuid;

use common::*;

fn token(value: &str) -> SessionToken {
    SessionToken::new(vec![Cookie::new("reddit_session", value)])
}

#[tokio::test]
async fn saved_session_is_returned_until_expiry() {
    init_tracing();
    let (_store, _vault, manager) = in_memory_manager();
    let account = Uuid::new_v4();
    let now = Utc::now();

    let record = manager.save_session_at(account, &token("abc"), 24, now).await.unwrap();
    assert_eq!(record.expiry, now + Duration::hours(24));
    assert_eq!(record.renewal_at, now + Duration::hours(22));
    assert!(!record.token_ciphertext.contains("abc"));

    let restored = manager.get_valid_session_at(account, now + Duration::hours(23)).await.unwrap();
    assert_eq!(restored, Some(token("abc")));

    let expired = manager.get_valid_session_at(account, now + Duration::hours(25)).await.unwrap();
    assert_eq!(expired, None);
    info!("Session expiry honoured");
}

#[tokio::test]
async fn saving_twice_keeps_a_single_record() {
    init_tracing();
    let (store, _vault, manager) = in_memory_manager();
    let account = Uuid::new_v4();

    manager.save_session(account, &token("first"), 24).await.unwrap();
    manager.save_session(account, &token("second"), 24).await.unwrap();

    assert_eq!(store.count_sessions(account).await.unwrap(), 1);
    assert_eq!(manager.get_valid_session(account).await.unwrap(), Some(token("second")));
}

#[tokio::test]
async fn unknown_account_has_no_session() {
    let (_store, _vault, manager) = in_memory_manager();
    assert_eq!(manager.get_valid_session(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn undecryptable_session_is_treated_as_absent() {
    init_tracing();
    let (store, _vault, manager) = in_memory_manager();
    let account = Uuid::new_v4();
    let now = Utc::now();

    // sealed under a different key
    let foreign = test_vault().encrypt(r#"{"cookies":[]}"#).unwrap();
    store
        .replace_sessions(SessionRecord {
            id: Uuid::new_v4(),
            account_id: account,
            token_ciphertext: foreign,
            created_at: now,
            expiry: now + Duration::hours(24),
            renewal_at: now + Duration::hours(22),
        })
        .await
        .unwrap();

    assert_eq!(manager.get_valid_session(account).await.unwrap(), None);
}

#[tokio::test]
async fn delete_removes_all_sessions() {
    let (store, _vault, manager) = in_memory_manager();
    let account = Uuid::new_v4();
    manager.save_session(account, &token("x"), 24).await.unwrap();

    assert_eq!(manager.delete_session(account).await.unwrap(), 1);
    assert_eq!(store.count_sessions(account).await.unwrap(), 0);
    assert_eq!(manager.get_valid_session(account).await.unwrap(), None);
}
