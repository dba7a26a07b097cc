use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::defs::{
    Account, AccountId, AccountMode, AccountStatus, ClassificationUpdate, ContentItem, ContentStatus, DashboardStats,
    Draft, DraftStatus, IntentType, Keyword, NewAccount, NewContentItem, PublishAttempt,
};
use interfaces::state::{normalize_variants, Store, StoreError, StoreResult};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn conflict_or_backend(e: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what()),
        _ => backend(e),
    }
}

fn decode<T>(value: Option<T>, column: &str, raw: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::Backend(format!("unexpected {} value: {}", column, raw)))
}

const ACCOUNT_COLUMNS: &str = "id, username, secret, mode, status, persona_prompt, last_active_at, created_at";
const CONTENT_COLUMNS: &str = "id, account_id, external_id, channel, title, body, author, url, nsfw, media_present, \
                               raw_payload, status, intent_type, intent_score, created_at";
const DRAFT_COLUMNS: &str =
    "id, account_id, content_id, text, approved, status, needs_review, review_note, created_at, updated_at";

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let mode: String = row.try_get("mode").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Account {
        id: row.try_get("id").map_err(backend)?,
        username: row.try_get("username").map_err(backend)?,
        secret: row.try_get("secret").map_err(backend)?,
        mode: decode(AccountMode::parse(&mode), "mode", &mode)?,
        status: decode(AccountStatus::parse(&status), "status", &status)?,
        persona_prompt: row.try_get("persona_prompt").map_err(backend)?,
        last_active_at: row.try_get("last_active_at").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn keyword_from_row(row: &PgRow) -> StoreResult<Keyword> {
    Ok(Keyword {
        id: row.try_get("id").map_err(backend)?,
        account_id: row.try_get("account_id").map_err(backend)?,
        base_term: row.try_get("base_term").map_err(backend)?,
        variants: row.try_get("variants").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn content_from_row(row: &PgRow) -> StoreResult<ContentItem> {
    let status: String = row.try_get("status").map_err(backend)?;
    let intent_type: Option<String> = row.try_get("intent_type").map_err(backend)?;
    let intent_type = match intent_type {
        Some(raw) => Some(decode(IntentType::parse(&raw), "intent_type", &raw)?),
        None => None,
    };
    Ok(ContentItem {
        id: row.try_get("id").map_err(backend)?,
        account_id: row.try_get("account_id").map_err(backend)?,
        external_id: row.try_get("external_id").map_err(backend)?,
        channel: row.try_get("channel").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
        author: row.try_get("author").map_err(backend)?,
        url: row.try_get("url").map_err(backend)?,
        nsfw: row.try_get("nsfw").map_err(backend)?,
        media_present: row.try_get("media_present").map_err(backend)?,
        raw_payload: row.try_get("raw_payload").map_err(backend)?,
        status: decode(ContentStatus::parse(&status), "status", &status)?,
        intent_type,
        intent_score: row.try_get("intent_score").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn draft_from_row(row: &PgRow) -> StoreResult<Draft> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Draft {
        id: row.try_get("id").map_err(backend)?,
        account_id: row.try_get("account_id").map_err(backend)?,
        content_id: row.try_get("content_id").map_err(backend)?,
        text: row.try_get("text").map_err(backend)?,
        approved: row.try_get("approved").map_err(backend)?,
        status: decode(DraftStatus::parse(&status), "status", &status)?,
        needs_review: row.try_get("needs_review").map_err(backend)?,
        review_note: row.try_get("review_note").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn attempt_from_row(row: &PgRow) -> StoreResult<PublishAttempt> {
    Ok(PublishAttempt {
        id: row.try_get("id").map_err(backend)?,
        draft_id: row.try_get("draft_id").map_err(backend)?,
        account_id: row.try_get("account_id").map_err(backend)?,
        content_id: row.try_get("content_id").map_err(backend)?,
        success: row.try_get("success").map_err(backend)?,
        error: row.try_get("error").map_err(backend)?,
        attempted_at: row.try_get("attempted_at").map_err(backend)?,
    })
}

/// Postgres-backed store for everything except sessions.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> PgPool {
        self.db.clone()
    }

    pub async fn setup_schema(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id UUID PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                secret TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                persona_prompt TEXT,
                last_active_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                base_term TEXT NOT NULL,
                variants TEXT[] NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS content_items (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL UNIQUE,
                channel TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT,
                author TEXT NOT NULL,
                url TEXT,
                nsfw BOOLEAN NOT NULL DEFAULT FALSE,
                media_present BOOLEAN NOT NULL DEFAULT FALSE,
                raw_payload JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                intent_type TEXT,
                intent_score DOUBLE PRECISION,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                content_id UUID NOT NULL UNIQUE REFERENCES content_items(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                approved BOOLEAN NOT NULL DEFAULT FALSE,
                status TEXT NOT NULL DEFAULT 'PENDING',
                needs_review BOOLEAN NOT NULL DEFAULT FALSE,
                review_note TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS publish_attempts (
                id UUID PRIMARY KEY,
                draft_id UUID NOT NULL REFERENCES drafts(id) ON DELETE CASCADE,
                account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                content_id UUID NOT NULL REFERENCES content_items(id) ON DELETE CASCADE,
                success BOOLEAN NOT NULL,
                error TEXT,
                attempted_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_content_items_status ON content_items (status, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_publish_attempts_draft ON publish_attempts (draft_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.db).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    async fn count(&self, sql: &str) -> StoreResult<i64> {
        let row = sqlx::query(sql).fetch_one(&self.db).await.map_err(backend)?;
        row.try_get::<i64, _>("count").map_err(backend)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let username = account.username.trim().to_string();
        if username.is_empty() {
            return Err(StoreError::Conflict("username must not be empty".to_string()));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO accounts (id, username, secret, mode, status, persona_prompt, created_at)
            VALUES ($1, $2, $3, $4, 'ACTIVE', $5, $6)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&username)
        .bind(&account.secret)
        .bind(account.mode.as_str())
        .bind(&account.persona_prompt)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|e| conflict_or_backend(e, || format!("username already exists: {}", username)))?;

        account_from_row(&row)
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {} FROM accounts ORDER BY created_at", ACCOUNT_COLUMNS))
            .fetch_all(&self.db)
            .await
            .map_err(backend)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.db)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("account", id));
        }
        Ok(())
    }

    async fn touch_account(&self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET last_active_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("account", id));
        }
        Ok(())
    }

    async fn create_keyword(
        &self,
        account_id: AccountId,
        base_term: &str,
        variants: Vec<String>,
    ) -> StoreResult<Keyword> {
        let row = sqlx::query(
            r#"
            INSERT INTO keywords (id, account_id, base_term, variants, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, base_term, variants, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(base_term.trim())
        .bind(normalize_variants(base_term, variants))
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::not_found("account", account_id),
            _ => backend(e),
        })?;
        keyword_from_row(&row)
    }

    async fn update_keyword(&self, id: Uuid, base_term: &str, variants: Vec<String>) -> StoreResult<Keyword> {
        let row = sqlx::query(
            r#"
            UPDATE keywords SET base_term = $2, variants = $3
            WHERE id = $1
            RETURNING id, account_id, base_term, variants, created_at
            "#,
        )
        .bind(id)
        .bind(base_term.trim())
        .bind(normalize_variants(base_term, variants))
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => keyword_from_row(&row),
            None => Err(StoreError::not_found("keyword", id)),
        }
    }

    async fn delete_keyword(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM keywords WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("keyword", id));
        }
        Ok(())
    }

    async fn keywords_for_account(&self, account_id: AccountId) -> StoreResult<Vec<Keyword>> {
        let rows = sqlx::query(
            "SELECT id, account_id, base_term, variants, created_at FROM keywords WHERE account_id = $1 ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn content_exists(&self, external_id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM content_items WHERE external_id = $1) AS present")
            .bind(external_id)
            .fetch_one(&self.db)
            .await
            .map_err(backend)?;
        row.try_get::<bool, _>("present").map_err(backend)
    }

    async fn insert_content_item(&self, item: NewContentItem) -> StoreResult<Option<ContentItem>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO content_items
                (id, account_id, external_id, channel, title, body, author, url, nsfw, media_present,
                 raw_payload, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'PENDING', $12)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {}
            "#,
            CONTENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(item.account_id)
        .bind(&item.external_id)
        .bind(&item.channel)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.author)
        .bind(&item.url)
        .bind(item.nsfw)
        .bind(item.media_present)
        .bind(&item.raw_payload)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(backend)?;

        if row.is_none() {
            debug!("Content {} already stored", item.external_id);
        }
        row.as_ref().map(content_from_row).transpose()
    }

    async fn get_content_item(&self, id: Uuid) -> StoreResult<Option<ContentItem>> {
        let row = sqlx::query(&format!("SELECT {} FROM content_items WHERE id = $1", CONTENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn apply_classification(&self, id: Uuid, update: ClassificationUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE content_items SET intent_type = $2, intent_score = $3, status = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(update.intent_type.as_str())
        .bind(update.intent_score)
        .bind(update.status.as_str())
        .execute(&self.db)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("content item", id));
        }
        Ok(())
    }

    async fn list_content_items(&self, status: Option<ContentStatus>, limit: usize) -> StoreResult<Vec<ContentItem>> {
        let limit = limit.min(i64::MAX as usize) as i64;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            CONTENT_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        rows.iter().map(content_from_row).collect()
    }

    async fn create_draft(&self, account_id: AccountId, content_id: Uuid, text: &str) -> StoreResult<Draft> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO drafts (id, account_id, content_id, text, approved, status, needs_review, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, 'PENDING', FALSE, $5, $5)
            RETURNING {}
            "#,
            DRAFT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(content_id)
        .bind(text)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .map_err(|e| conflict_or_backend(e, || format!("draft already exists for content {}", content_id)))?;
        draft_from_row(&row)
    }

    async fn draft_for_content(&self, content_id: Uuid) -> StoreResult<Option<Draft>> {
        let row = sqlx::query(&format!("SELECT {} FROM drafts WHERE content_id = $1", DRAFT_COLUMNS))
            .bind(content_id)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        row.as_ref().map(draft_from_row).transpose()
    }

    async fn get_draft(&self, id: Uuid) -> StoreResult<Option<Draft>> {
        let row = sqlx::query(&format!("SELECT {} FROM drafts WHERE id = $1", DRAFT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;
        row.as_ref().map(draft_from_row).transpose()
    }

    async fn list_drafts(&self, approved: Option<bool>) -> StoreResult<Vec<Draft>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM drafts WHERE ($1::BOOLEAN IS NULL OR approved = $1) ORDER BY created_at DESC",
            DRAFT_COLUMNS
        ))
        .bind(approved)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        rows.iter().map(draft_from_row).collect()
    }

    async fn set_draft_approved(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE drafts SET approved = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("draft", id));
        }
        Ok(())
    }

    async fn reject_draft(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE drafts SET approved = FALSE, status = 'REJECTED', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("draft", id));
        }
        Ok(())
    }

    async fn flag_draft_for_review(&self, id: Uuid, note: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE drafts SET needs_review = TRUE, review_note = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(note)
        .execute(&self.db)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("draft", id));
        }
        Ok(())
    }

    async fn append_publish_attempt(&self, attempt: PublishAttempt) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_attempts (id, draft_id, account_id, content_id, success, error, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.draft_id)
        .bind(attempt.account_id)
        .bind(attempt.content_id)
        .bind(attempt.success)
        .bind(&attempt.error)
        .bind(attempt.attempted_at)
        .execute(&self.db)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn record_publish_success(&self, attempt: PublishAttempt) -> StoreResult<()> {
        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.db.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO publish_attempts (id, draft_id, account_id, content_id, success, error, attempted_at)
            VALUES ($1, $2, $3, $4, TRUE, NULL, $5)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.draft_id)
        .bind(attempt.account_id)
        .bind(attempt.content_id)
        .bind(attempt.attempted_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let drafts = sqlx::query(
            "UPDATE drafts SET status = 'POSTED', approved = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(attempt.draft_id)
        .bind(attempt.attempted_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if drafts.rows_affected() != 1 {
            return Err(StoreError::not_found("draft", attempt.draft_id));
        }

        let items = sqlx::query("UPDATE content_items SET status = 'POSTED' WHERE id = $1")
            .bind(attempt.content_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if items.rows_affected() != 1 {
            return Err(StoreError::not_found("content item", attempt.content_id));
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn publish_attempts_for_draft(&self, draft_id: Uuid) -> StoreResult<Vec<PublishAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, draft_id, account_id, content_id, success, error, attempted_at
            FROM publish_attempts WHERE draft_id = $1 ORDER BY attempted_at
            "#,
        )
        .bind(draft_id)
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        Ok(DashboardStats {
            accounts: self.count("SELECT COUNT(*) AS count FROM accounts").await?,
            active_accounts: self
                .count("SELECT COUNT(*) AS count FROM accounts WHERE status = 'ACTIVE'")
                .await?,
            content_items: self.count("SELECT COUNT(*) AS count FROM content_items").await?,
            unapproved_drafts: self
                .count("SELECT COUNT(*) AS count FROM drafts WHERE approved = FALSE")
                .await?,
        })
    }
}
