use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use interfaces::defs::{AccountId, SessionRecord, SessionToken};
use interfaces::state::{SessionStore, StoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::vault::{CredentialVault, CryptoError};

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const RENEWAL_LEAD_HOURS: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("session crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("session token serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists and restores encrypted session tokens, at most one per account.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    vault: Arc<CredentialVault>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, vault: Arc<CredentialVault>) -> Self {
        Self { store, vault }
    }

    /// Returns the newest unexpired token for the account.
    ///
    /// A record that cannot be decrypted is treated as absent.
    pub async fn get_valid_session(&self, account_id: AccountId) -> Result<Option<SessionToken>, SessionError> {
        self.get_valid_session_at(account_id, Utc::now()).await
    }

    pub async fn get_valid_session_at(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>, SessionError> {
        let Some(record) = self.store.latest_session(account_id).await? else {
            debug!("No stored session for account {}", account_id);
            return Ok(None);
        };

        if !record.is_current(now) {
            debug!("Stored session for account {} expired at {}", account_id, record.expiry);
            return Ok(None);
        }

        if record.needs_renewal(now) {
            info!("Session for account {} is due for renewal", account_id);
        }

        let plaintext = match self.vault.decrypt(&record.token_ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Discarding unreadable session for account {}: {}", account_id, e);
                return Ok(None);
            }
        };

        match serde_json::from_str::<SessionToken>(&plaintext) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!("Discarding malformed session for account {}: {}", account_id, e);
                Ok(None)
            }
        }
    }

    /// Replaces any stored sessions for the account with `token`.
    pub async fn save_session(
        &self,
        account_id: AccountId,
        token: &SessionToken,
        ttl_hours: i64,
    ) -> Result<SessionRecord, SessionError> {
        self.save_session_at(account_id, token, ttl_hours, Utc::now()).await
    }

    pub async fn save_session_at(
        &self,
        account_id: AccountId,
        token: &SessionToken,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, SessionError> {
        let plaintext = serde_json::to_string(token)?;
        let token_ciphertext = self.vault.encrypt(&plaintext)?;

        let expiry = now + Duration::hours(ttl_hours);
        let record = SessionRecord {
            id: Uuid::new_v4(),
            account_id,
            token_ciphertext,
            created_at: now,
            expiry,
            renewal_at: expiry - Duration::hours(RENEWAL_LEAD_HOURS),
        };

        self.store.replace_sessions(record.clone()).await?;
        info!("Saved session for account {} (expires {})", account_id, expiry);
        Ok(record)
    }

    pub async fn delete_session(&self, account_id: AccountId) -> Result<u64, SessionError> {
        let removed = self.store.delete_sessions(account_id).await?;
        debug!("Removed {} session(s) for account {}", removed, account_id);
        Ok(removed)
    }
}
