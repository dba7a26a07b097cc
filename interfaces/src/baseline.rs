use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::defs::{
    Account, AccountId, AccountStatus, ClassificationUpdate, ContentItem, ContentStatus, DashboardStats, Draft,
    DraftStatus, Keyword, NewAccount, NewContentItem, PublishAttempt, SessionRecord,
};
use crate::state::{normalize_variants, SessionStore, Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    sessions: Vec<SessionRecord>,
    keywords: HashMap<Uuid, Keyword>,
    content: HashMap<Uuid, ContentItem>,
    content_by_external: HashMap<String, Uuid>,
    drafts: HashMap<Uuid, Draft>,
    attempts: Vec<PublishAttempt>,
}

/// Process-local store. Every operation takes the single table lock, so
/// multi-row writes are atomic with respect to other callers.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_publish_commits: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `record_publish_success` fail before writing anything.
    pub fn fail_publish_commits(&self, fail: bool) {
        self.fail_publish_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn latest_session(&self, account_id: AccountId) -> StoreResult<Option<SessionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .filter(|s| s.account_id == account_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn replace_sessions(&self, record: SessionRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.retain(|s| s.account_id != record.account_id);
        tables.sessions.push(record);
        Ok(())
    }

    async fn delete_sessions(&self, account_id: AccountId) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|s| s.account_id != account_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn count_sessions(&self, account_id: AccountId) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.iter().filter(|s| s.account_id == account_id).count() as u64)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let username = account.username.trim().to_string();
        if username.is_empty() {
            return Err(StoreError::Conflict("username must not be empty".to_string()));
        }
        let mut tables = self.tables.write().await;
        if tables.accounts.values().any(|a| a.username == username) {
            return Err(StoreError::Conflict(format!("username already exists: {}", username)));
        }
        let created = Account {
            id: Uuid::new_v4(),
            username,
            secret: account.secret,
            mode: account.mode,
            status: AccountStatus::Active,
            persona_prompt: account.persona_prompt,
            last_active_at: None,
            created_at: Utc::now(),
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.tables.read().await.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        account.status = status;
        Ok(())
    }

    async fn touch_account(&self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        account.last_active_at = Some(at);
        Ok(())
    }

    async fn create_keyword(
        &self,
        account_id: AccountId,
        base_term: &str,
        variants: Vec<String>,
    ) -> StoreResult<Keyword> {
        let mut tables = self.tables.write().await;
        if !tables.accounts.contains_key(&account_id) {
            return Err(StoreError::not_found("account", account_id));
        }
        let keyword = Keyword {
            id: Uuid::new_v4(),
            account_id,
            base_term: base_term.trim().to_string(),
            variants: normalize_variants(base_term, variants),
            created_at: Utc::now(),
        };
        tables.keywords.insert(keyword.id, keyword.clone());
        Ok(keyword)
    }

    async fn update_keyword(&self, id: Uuid, base_term: &str, variants: Vec<String>) -> StoreResult<Keyword> {
        let mut tables = self.tables.write().await;
        let keyword = tables
            .keywords
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("keyword", id))?;
        keyword.base_term = base_term.trim().to_string();
        keyword.variants = normalize_variants(base_term, variants);
        Ok(keyword.clone())
    }

    async fn delete_keyword(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .keywords
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("keyword", id))
    }

    async fn keywords_for_account(&self, account_id: AccountId) -> StoreResult<Vec<Keyword>> {
        let tables = self.tables.read().await;
        let mut keywords: Vec<Keyword> = tables
            .keywords
            .values()
            .filter(|k| k.account_id == account_id)
            .cloned()
            .collect();
        keywords.sort_by_key(|k| k.created_at);
        Ok(keywords)
    }

    async fn content_exists(&self, external_id: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.content_by_external.contains_key(external_id))
    }

    async fn insert_content_item(&self, item: NewContentItem) -> StoreResult<Option<ContentItem>> {
        let mut tables = self.tables.write().await;
        if tables.content_by_external.contains_key(&item.external_id) {
            return Ok(None);
        }
        let stored = ContentItem {
            id: Uuid::new_v4(),
            account_id: item.account_id,
            external_id: item.external_id,
            channel: item.channel,
            title: item.title,
            body: item.body,
            author: item.author,
            url: item.url,
            nsfw: item.nsfw,
            media_present: item.media_present,
            raw_payload: item.raw_payload,
            status: ContentStatus::Pending,
            intent_type: None,
            intent_score: None,
            created_at: Utc::now(),
        };
        tables.content_by_external.insert(stored.external_id.clone(), stored.id);
        tables.content.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn get_content_item(&self, id: Uuid) -> StoreResult<Option<ContentItem>> {
        Ok(self.tables.read().await.content.get(&id).cloned())
    }

    async fn apply_classification(&self, id: Uuid, update: ClassificationUpdate) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let item = tables
            .content
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("content item", id))?;
        item.intent_type = Some(update.intent_type);
        item.intent_score = Some(update.intent_score);
        item.status = update.status;
        Ok(())
    }

    async fn list_content_items(&self, status: Option<ContentStatus>, limit: usize) -> StoreResult<Vec<ContentItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<ContentItem> = tables
            .content
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn create_draft(&self, account_id: AccountId, content_id: Uuid, text: &str) -> StoreResult<Draft> {
        let mut tables = self.tables.write().await;
        if !tables.content.contains_key(&content_id) {
            return Err(StoreError::not_found("content item", content_id));
        }
        if tables.drafts.values().any(|d| d.content_id == content_id) {
            return Err(StoreError::Conflict(format!("draft already exists for content {}", content_id)));
        }
        let now = Utc::now();
        let draft = Draft {
            id: Uuid::new_v4(),
            account_id,
            content_id,
            text: text.to_string(),
            approved: false,
            status: DraftStatus::Pending,
            needs_review: false,
            review_note: None,
            created_at: now,
            updated_at: now,
        };
        tables.drafts.insert(draft.id, draft.clone());
        Ok(draft)
    }

    async fn draft_for_content(&self, content_id: Uuid) -> StoreResult<Option<Draft>> {
        let tables = self.tables.read().await;
        Ok(tables.drafts.values().find(|d| d.content_id == content_id).cloned())
    }

    async fn get_draft(&self, id: Uuid) -> StoreResult<Option<Draft>> {
        Ok(self.tables.read().await.drafts.get(&id).cloned())
    }

    async fn list_drafts(&self, approved: Option<bool>) -> StoreResult<Vec<Draft>> {
        let tables = self.tables.read().await;
        let mut drafts: Vec<Draft> = tables
            .drafts
            .values()
            .filter(|d| approved.map_or(true, |a| d.approved == a))
            .cloned()
            .collect();
        drafts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(drafts)
    }

    async fn set_draft_approved(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let draft = tables.drafts.get_mut(&id).ok_or_else(|| StoreError::not_found("draft", id))?;
        draft.approved = true;
        draft.updated_at = Utc::now();
        Ok(())
    }

    async fn reject_draft(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let draft = tables.drafts.get_mut(&id).ok_or_else(|| StoreError::not_found("draft", id))?;
        draft.status = DraftStatus::Rejected;
        draft.approved = false;
        draft.updated_at = Utc::now();
        Ok(())
    }

    async fn flag_draft_for_review(&self, id: Uuid, note: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let draft = tables.drafts.get_mut(&id).ok_or_else(|| StoreError::not_found("draft", id))?;
        draft.needs_review = true;
        draft.review_note = Some(note.to_string());
        draft.updated_at = Utc::now();
        Ok(())
    }

    async fn append_publish_attempt(&self, attempt: PublishAttempt) -> StoreResult<()> {
        self.tables.write().await.attempts.push(attempt);
        Ok(())
    }

    async fn record_publish_success(&self, attempt: PublishAttempt) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if self.fail_publish_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("publish commit rejected".to_string()));
        }
        if !tables.drafts.contains_key(&attempt.draft_id) {
            return Err(StoreError::not_found("draft", attempt.draft_id));
        }
        if !tables.content.contains_key(&attempt.content_id) {
            return Err(StoreError::not_found("content item", attempt.content_id));
        }

        // validated above, nothing below can fail
        if let Some(draft) = tables.drafts.get_mut(&attempt.draft_id) {
            draft.status = DraftStatus::Posted;
            draft.approved = true;
            draft.updated_at = attempt.attempted_at;
        }
        if let Some(item) = tables.content.get_mut(&attempt.content_id) {
            item.status = ContentStatus::Posted;
        }
        tables.attempts.push(attempt);
        Ok(())
    }

    async fn publish_attempts_for_draft(&self, draft_id: Uuid) -> StoreResult<Vec<PublishAttempt>> {
        let tables = self.tables.read().await;
        Ok(tables.attempts.iter().filter(|a| a.draft_id == draft_id).cloned().collect())
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        let tables = self.tables.read().await;
        Ok(DashboardStats {
            accounts: tables.accounts.len() as i64,
            active_accounts: tables.accounts.values().filter(|a| a.is_active()).count() as i64,
            content_items: tables.content.len() as i64,
            unapproved_drafts: tables.drafts.values().filter(|d| !d.approved).count() as i64,
        })
    }
}
