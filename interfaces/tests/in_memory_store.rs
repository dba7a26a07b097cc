use interfaces::defs::*;
use interfaces::state::normalize_variants;
use interfaces::{InMemoryStore, Store, StoreError};

fn new_account(username: &str, mode: AccountMode) -> NewAccount {
    NewAccount {
        username: username.to_string(),
        secret: "hunter2".to_string(),
        mode,
        persona_prompt: None,
    }
}

fn new_item(account_id: AccountId, external_id: &str) -> NewContentItem {
    NewContentItem {
        account_id,
        external_id: external_id.to_string(),
        channel: "rateme".to_string(),
        title: "rate my setup?".to_string(),
        body: None,
        author: "someone".to_string(),
        url: None,
        nsfw: false,
        media_present: false,
        raw_payload: serde_json::json!({ "id": external_id }),
    }
}

#[tokio::test]
async fn usernames_are_trimmed_and_unique() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("  alice ", AccountMode::Both)).await.unwrap();
    assert_eq!(account.username, "alice");
    assert_eq!(account.status, AccountStatus::Active);

    let duplicate = store.create_account(new_account("alice", AccountMode::Scrape)).await;
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
}

#[tokio::test]
async fn keyword_variants_default_to_base_term() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("bob", AccountMode::Scrape)).await.unwrap();

    let keyword = store.create_keyword(account.id, "photography", vec![]).await.unwrap();
    assert_eq!(keyword.variants, vec!["photography".to_string()]);

    let updated = store
        .update_keyword(keyword.id, "photo", vec!["photo".to_string(), " camera ".to_string()])
        .await
        .unwrap();
    assert_eq!(updated.variants, vec!["photo".to_string(), "camera".to_string()]);

    store.delete_keyword(keyword.id).await.unwrap();
    assert!(store.keywords_for_account(account.id).await.unwrap().is_empty());
    assert_eq!(normalize_variants("x", vec!["  ".to_string()]), vec!["x".to_string()]);
}

#[tokio::test]
async fn duplicate_external_ids_are_not_stored_twice() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("carol", AccountMode::Scrape)).await.unwrap();

    let first = store.insert_content_item(new_item(account.id, "abc")).await.unwrap();
    assert!(first.is_some());
    assert_eq!(first.unwrap().status, ContentStatus::Pending);

    let second = store.insert_content_item(new_item(account.id, "abc")).await.unwrap();
    assert!(second.is_none());
    assert!(store.content_exists("abc").await.unwrap());
    assert_eq!(store.list_content_items(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn publish_success_commits_all_three_records() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("dave", AccountMode::Both)).await.unwrap();
    let item = store.insert_content_item(new_item(account.id, "p1")).await.unwrap().unwrap();
    let draft = store.create_draft(account.id, item.id, "hello").await.unwrap();

    store.record_publish_success(PublishAttempt::succeeded(&draft)).await.unwrap();

    let draft = store.get_draft(draft.id).await.unwrap().unwrap();
    assert_eq!(draft.status, DraftStatus::Posted);
    assert!(draft.approved);
    let item = store.get_content_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.status, ContentStatus::Posted);
    assert_eq!(store.publish_attempts_for_draft(draft.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_publish_commit_leaves_nothing_behind() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("erin", AccountMode::Both)).await.unwrap();
    let item = store.insert_content_item(new_item(account.id, "p2")).await.unwrap().unwrap();
    let draft = store.create_draft(account.id, item.id, "hello").await.unwrap();

    store.fail_publish_commits(true);
    assert!(store.record_publish_success(PublishAttempt::succeeded(&draft)).await.is_err());

    let draft = store.get_draft(draft.id).await.unwrap().unwrap();
    assert_eq!(draft.status, DraftStatus::Pending);
    assert!(!draft.approved);
    let item = store.get_content_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.status, ContentStatus::Pending);
    assert!(store.publish_attempts_for_draft(draft.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_count_unapproved_drafts() {
    let store = InMemoryStore::new();
    let account = store.create_account(new_account("frank", AccountMode::Both)).await.unwrap();
    let idle = store.create_account(new_account("gina", AccountMode::Post)).await.unwrap();
    store.set_account_status(idle.id, AccountStatus::Inactive).await.unwrap();

    let a = store.insert_content_item(new_item(account.id, "s1")).await.unwrap().unwrap();
    let b = store.insert_content_item(new_item(account.id, "s2")).await.unwrap().unwrap();
    let first = store.create_draft(account.id, a.id, "one").await.unwrap();
    store.create_draft(account.id, b.id, "two").await.unwrap();
    store.set_draft_approved(first.id).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(
        stats,
        DashboardStats {
            accounts: 2,
            active_accounts: 1,
            content_items: 2,
            unapproved_drafts: 1,
        }
    );
}

#[test]
fn session_token_debug_hides_values() {
    let token = SessionToken::new(vec![Cookie::new("reddit_session", "secret-value")]);
    let rendered = format!("{:?}", token);
    assert!(rendered.contains("reddit_session"));
    assert!(!rendered.contains("secret-value"));
    assert!(token.has_any_cookie(&["token_v2".to_string(), "reddit_session".to_string()]));
    assert_eq!(token.cookie_header(), "reddit_session=secret-value");
}

#[test]
fn classify_task_round_trips_through_payload() {
    let request = ClassifyContent {
        content_id: uuid::Uuid::new_v4(),
        account_id: uuid::Uuid::new_v4(),
    };
    let task = request.into_task();
    assert_eq!(task.name, CLASSIFY_CONTENT_TASK);
    assert_eq!(ClassifyContent::from_task(&task), Some(request));
}
