use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::defs::{
    Account, AccountId, AccountStatus, ClassificationUpdate, ContentItem, ContentStatus, DashboardStats, Draft,
    Keyword, NewAccount, NewContentItem, PublishAttempt, SessionRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for encrypted session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recently created session for the account, if any.
    async fn latest_session(&self, account_id: AccountId) -> StoreResult<Option<SessionRecord>>;

    /// Deletes every session of the account and inserts `record`, atomically.
    async fn replace_sessions(&self, record: SessionRecord) -> StoreResult<()>;

    async fn delete_sessions(&self, account_id: AccountId) -> StoreResult<u64>;

    async fn count_sessions(&self, account_id: AccountId) -> StoreResult<u64>;
}

/// Persistence for accounts, keywords, content, drafts and publish attempts.
#[async_trait]
pub trait Store: Send + Sync {
    // accounts

    /// Trims the username. Fails with `Conflict` when the trimmed name is taken.
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account>;

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> StoreResult<()>;

    async fn touch_account(&self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()>;

    // keywords

    /// `variants` defaults to `[base_term]` when empty.
    async fn create_keyword(&self, account_id: AccountId, base_term: &str, variants: Vec<String>)
        -> StoreResult<Keyword>;

    async fn update_keyword(&self, id: Uuid, base_term: &str, variants: Vec<String>) -> StoreResult<Keyword>;

    async fn delete_keyword(&self, id: Uuid) -> StoreResult<()>;

    async fn keywords_for_account(&self, account_id: AccountId) -> StoreResult<Vec<Keyword>>;

    // content

    async fn content_exists(&self, external_id: &str) -> StoreResult<bool>;

    /// Returns `None` when an item with the same external id is already stored.
    async fn insert_content_item(&self, item: NewContentItem) -> StoreResult<Option<ContentItem>>;

    async fn get_content_item(&self, id: Uuid) -> StoreResult<Option<ContentItem>>;

    async fn apply_classification(&self, id: Uuid, update: ClassificationUpdate) -> StoreResult<()>;

    async fn list_content_items(&self, status: Option<ContentStatus>, limit: usize) -> StoreResult<Vec<ContentItem>>;

    // drafts

    async fn create_draft(&self, account_id: AccountId, content_id: Uuid, text: &str) -> StoreResult<Draft>;

    async fn draft_for_content(&self, content_id: Uuid) -> StoreResult<Option<Draft>>;

    async fn get_draft(&self, id: Uuid) -> StoreResult<Option<Draft>>;

    async fn list_drafts(&self, approved: Option<bool>) -> StoreResult<Vec<Draft>>;

    async fn set_draft_approved(&self, id: Uuid) -> StoreResult<()>;

    /// Clears approval and marks the draft REJECTED.
    async fn reject_draft(&self, id: Uuid) -> StoreResult<()>;

    async fn flag_draft_for_review(&self, id: Uuid, note: &str) -> StoreResult<()>;

    // publishing

    async fn append_publish_attempt(&self, attempt: PublishAttempt) -> StoreResult<()>;

    /// Appends a successful attempt, marks the draft POSTED and approved, and
    /// marks the content item POSTED. All three commit together or none do.
    async fn record_publish_success(&self, attempt: PublishAttempt) -> StoreResult<()>;

    async fn publish_attempts_for_draft(&self, draft_id: Uuid) -> StoreResult<Vec<PublishAttempt>>;

    async fn stats(&self) -> StoreResult<DashboardStats>;
}

/// Fills in the default variant list for a keyword.
pub fn normalize_variants(base_term: &str, variants: Vec<String>) -> Vec<String> {
    let variants: Vec<String> = variants
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if variants.is_empty() {
        vec![base_term.trim().to_string()]
    } else {
        variants
    }
}
