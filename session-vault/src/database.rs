use anyhow::Result;
use async_trait::async_trait;
use interfaces::defs::{AccountId, SessionRecord};
use interfaces::state::{SessionStore, StoreError, StoreResult};
use sqlx::{PgPool, Row};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Postgres-backed session storage.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL,
                token_ciphertext TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                expiry TIMESTAMP WITH TIME ZONE NOT NULL,
                renewal_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions (account_id, created_at DESC)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn latest_session(&self, account_id: AccountId) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, token_ciphertext, created_at, expiry, renewal_at
            FROM sessions
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(SessionRecord {
                id: r.try_get("id").map_err(backend)?,
                account_id: r.try_get("account_id").map_err(backend)?,
                token_ciphertext: r.try_get("token_ciphertext").map_err(backend)?,
                created_at: r.try_get("created_at").map_err(backend)?,
                expiry: r.try_get("expiry").map_err(backend)?,
                renewal_at: r.try_get("renewal_at").map_err(backend)?,
            })),
            None => Ok(None),
        }
    }

    async fn replace_sessions(&self, record: SessionRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM sessions WHERE account_id = $1")
            .bind(record.account_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, account_id, token_ciphertext, created_at, expiry, renewal_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.token_ciphertext)
        .bind(record.created_at)
        .bind(record.expiry)
        .bind(record.renewal_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_sessions(&self, account_id: AccountId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn count_sessions(&self, account_id: AccountId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM sessions WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.get::<i64, _>("count") as u64)
    }
}
