pub mod challenge;
pub mod http_page;
pub mod reddit;
pub mod strategies;

use std::sync::Arc;

use async_trait::async_trait;
use interfaces::defs::{Account, SessionToken};
use session_vault::SessionManager;
use tracing::{info, warn};

use crate::registry::AccountRegistry;
use crate::types::{AutomationError, HarvestedItem};

pub use reddit::RedditAutomation;

/// Why a publish did not verify. Ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishFailure {
    NavigationFailed(String),
    InputNotFound(String),
    RateLimited(String),
    VerificationFailed(String),
    Unknown(String),
}

impl PublishFailure {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PublishFailure::RateLimited(_))
    }

    pub fn describe(&self) -> String {
        match self {
            PublishFailure::NavigationFailed(m) => format!("navigation failed: {}", m),
            PublishFailure::InputNotFound(m) => format!("reply input not found: {}", m),
            PublishFailure::RateLimited(m) => format!("rate limited: {}", m),
            PublishFailure::VerificationFailed(m) => format!("reply could not be verified: {}", m),
            PublishFailure::Unknown(m) => m.clone(),
        }
    }

    /// Maps a step error onto a failure, passing through the errors that
    /// mean publishing could not even be attempted.
    pub fn classify(error: AutomationError) -> Result<Self, AutomationError> {
        match error {
            AutomationError::NotAuthenticated => Err(AutomationError::NotAuthenticated),
            AutomationError::NavigationFailed(m) => Ok(PublishFailure::NavigationFailed(m)),
            AutomationError::InputNotFound(m) => Ok(PublishFailure::InputNotFound(m)),
            AutomationError::RateLimited(m) => Ok(PublishFailure::RateLimited(m)),
            AutomationError::VerificationFailed(m) => Ok(PublishFailure::VerificationFailed(m)),
            other => Ok(PublishFailure::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub verified: bool,
    pub failure: Option<PublishFailure>,
}

impl PublishReport {
    pub fn verified() -> Self {
        Self {
            verified: true,
            failure: None,
        }
    }

    pub fn failed(failure: PublishFailure) -> Self {
        Self {
            verified: false,
            failure: Some(failure),
        }
    }
}

/// Per-account platform automation.
#[async_trait]
pub trait AccountAutomation: Send + Sync {
    /// Authenticates and keeps the resulting session loaded.
    async fn login(&self, username: &str, secret: &str) -> Result<SessionToken, AutomationError>;

    async fn load_session(&self, token: SessionToken);

    async fn has_session(&self) -> bool;

    /// Bounded liveness check. A check that runs out of time counts as usable.
    async fn verify_session(&self, token: &SessionToken) -> bool;

    /// Recent posts from `channel` ("all" fans out), newest-window only, no repeated ids.
    async fn fetch_recent_items(
        &self,
        channel: &str,
        limit: usize,
        recency_window: std::time::Duration,
    ) -> Result<Vec<HarvestedItem>, AutomationError>;

    /// Errors only when publishing could not start; an unverified reply is an `Ok` report.
    async fn publish_reply(
        &self,
        target_url: Option<&str>,
        target_id: &str,
        text: &str,
    ) -> Result<PublishReport, AutomationError>;
}

pub trait AutomationFactory: Send + Sync {
    fn create(&self, account: &Account) -> Arc<dyn AccountAutomation>;
}

/// Process-lifetime cache of one automation instance per account, shared by
/// the scrape cycles and the approval workflow.
pub struct AdapterCache {
    factory: Arc<dyn AutomationFactory>,
    adapters: AccountRegistry<Arc<dyn AccountAutomation>>,
}

impl AdapterCache {
    pub fn new(factory: Arc<dyn AutomationFactory>) -> Self {
        Self {
            factory,
            adapters: AccountRegistry::new(),
        }
    }

    pub async fn resolve(&self, account: &Account) -> Arc<dyn AccountAutomation> {
        self.adapters
            .get_or_insert_with(account.id, || self.factory.create(account))
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// The automation instance already held a session.
    Loaded,
    /// Restored from the session store.
    Restored,
    LoggedIn,
}

/// Makes sure `automation` holds a session for `account`: keep the loaded
/// one, else restore the stored one, else log in and store the new one.
///
/// Store and decryption problems fall through to a fresh login. Only a failed
/// login is an error.
pub async fn ensure_session(
    automation: &dyn AccountAutomation,
    sessions: &SessionManager,
    account: &Account,
    ttl_hours: i64,
) -> Result<SessionSource, AutomationError> {
    if automation.has_session().await {
        return Ok(SessionSource::Loaded);
    }

    match sessions.get_valid_session(account.id).await {
        Ok(Some(token)) => {
            if automation.verify_session(&token).await {
                automation.load_session(token).await;
                info!(account_id = %account.id, "Restored stored session");
                return Ok(SessionSource::Restored);
            }
            info!(account_id = %account.id, "Stored session is no longer accepted, logging in");
        }
        Ok(None) => {}
        Err(e) => warn!(account_id = %account.id, "Could not read stored session: {}", e),
    }

    if !account.has_credentials() {
        return Err(AutomationError::Authentication("account has no credentials".to_string()));
    }

    let token = automation.login(&account.username, &account.secret).await?;
    if let Err(e) = sessions.save_session(account.id, &token, ttl_hours).await {
        warn!(account_id = %account.id, "Logged in but could not store session: {}", e);
    }
    Ok(SessionSource::LoggedIn)
}
