use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = Uuid;

// ============================================================================
// Accounts
// ============================================================================

/// What an account is allowed to do on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountMode {
    Scrape,
    Post,
    Both,
}

impl AccountMode {
    pub fn can_harvest(&self) -> bool {
        matches!(self, AccountMode::Scrape | AccountMode::Both)
    }

    pub fn can_publish(&self) -> bool {
        matches!(self, AccountMode::Post | AccountMode::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountMode::Scrape => "SCRAPE",
            AccountMode::Post => "POST",
            AccountMode::Both => "BOTH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SCRAPE" => Some(AccountMode::Scrape),
            "POST" => Some(AccountMode::Post),
            "BOTH" => Some(AccountMode::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(AccountStatus::Active),
            "INACTIVE" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub secret: String,
    pub mode: AccountMode,
    pub status: AccountStatus,
    /// Persona text handed to the generation service for this account's replies.
    pub persona_prompt: Option<String>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.secret.is_empty()
    }
}

// Hand-written so the secret never reaches a log line.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("last_active_at", &self.last_active_at)
            .finish()
    }
}

#[derive(Clone)]
pub struct NewAccount {
    pub username: String,
    pub secret: String,
    pub mode: AccountMode,
    pub persona_prompt: Option<String>,
}

// ============================================================================
// Sessions
// ============================================================================

/// Persisted authentication artifact. The token is stored encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub account_id: AccountId,
    pub token_ciphertext: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub renewal_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }

    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.renewal_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Opaque bundle of cookies that lets a page act as a logged-in account.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub cookies: Vec<Cookie>,
}

impl SessionToken {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// True when any cookie carries one of the given names with a non-empty value.
    pub fn has_any_cookie(&self, names: &[String]) -> bool {
        self.cookies
            .iter()
            .any(|c| !c.value.is_empty() && names.iter().any(|n| n == &c.name))
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.cookies.iter().map(|c| c.name.as_str()).collect();
        f.debug_struct("SessionToken").field("cookies", &names).finish()
    }
}

// ============================================================================
// Keywords and content
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub account_id: AccountId,
    pub base_term: String,
    pub variants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Pending,
    Verified,
    Rejected,
    Posted,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "PENDING",
            ContentStatus::Verified => "VERIFIED",
            ContentStatus::Rejected => "REJECTED",
            ContentStatus::Posted => "POSTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ContentStatus::Pending),
            "VERIFIED" => Some(ContentStatus::Verified),
            "REJECTED" => Some(ContentStatus::Rejected),
            "POSTED" => Some(ContentStatus::Posted),
            _ => None,
        }
    }
}

/// Persisted outcome of intent detection. Offers are vetoed to `Irrelevant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    RequestingService,
    Irrelevant,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::RequestingService => "REQUESTING_SERVICE",
            IntentType::Irrelevant => "IRRELEVANT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "REQUESTING_SERVICE" => Some(IntentType::RequestingService),
            "IRRELEVANT" => Some(IntentType::Irrelevant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub account_id: AccountId,
    /// Platform-assigned post id. Globally unique; the dedup key.
    pub external_id: String,
    pub channel: String,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub url: Option<String>,
    pub nsfw: bool,
    pub media_present: bool,
    pub raw_payload: serde_json::Value,
    pub status: ContentStatus,
    pub intent_type: Option<IntentType>,
    pub intent_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub account_id: AccountId,
    pub external_id: String,
    pub channel: String,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub url: Option<String>,
    pub nsfw: bool,
    pub media_present: bool,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationUpdate {
    pub intent_type: IntentType,
    pub intent_score: f64,
    pub status: ContentStatus,
}

// ============================================================================
// Drafts and publish attempts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftStatus {
    Pending,
    Posted,
    Rejected,
}

impl DraftStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DraftStatus::Posted | DraftStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "PENDING",
            DraftStatus::Posted => "POSTED",
            DraftStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(DraftStatus::Pending),
            "POSTED" => Some(DraftStatus::Posted),
            "REJECTED" => Some(DraftStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub account_id: AccountId,
    pub content_id: Uuid,
    pub text: String,
    pub approved: bool,
    pub status: DraftStatus,
    /// Set when a publish failed in a way that may still have landed upstream.
    pub needs_review: bool,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub account_id: AccountId,
    pub content_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl PublishAttempt {
    pub fn succeeded(draft: &Draft) -> Self {
        Self {
            id: Uuid::new_v4(),
            draft_id: draft.id,
            account_id: draft.account_id,
            content_id: draft.content_id,
            success: true,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failed(draft: &Draft, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            draft_id: draft.id,
            account_id: draft.account_id,
            content_id: draft.content_id,
            success: false,
            error: Some(error.into()),
            attempted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub accounts: i64,
    pub active_accounts: i64,
    pub content_items: i64,
    pub unapproved_drafts: i64,
}

// ============================================================================
// External capabilities
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability failed: {0}")]
    Failed(String),
}

/// How the page controller should find elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selector {
    Css(String),
    Text(String),
    Placeholder(String),
}

impl Selector {
    pub fn css(value: &str) -> Self {
        Selector::Css(value.to_string())
    }

    pub fn text(value: &str) -> Self {
        Selector::Text(value.to_string())
    }

    pub fn placeholder(value: &str) -> Self {
        Selector::Placeholder(value.to_string())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "css={}", css),
            Selector::Text(text) => write!(f, "text={}", text),
            Selector::Placeholder(text) => write!(f, "placeholder={}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: Option<u16>,
}

/// Low-level browser automation supplied by the host environment.
///
/// Implementations own one page. Callers bracket each operation group with
/// `open` and `close`.
#[async_trait]
pub trait PageController: Send + Sync {
    async fn open(&self) -> Result<(), CapabilityError>;

    async fn close(&self) -> Result<(), CapabilityError>;

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult, CapabilityError>;

    async fn current_url(&self) -> Result<String, CapabilityError>;

    async fn title(&self) -> Result<String, CapabilityError>;

    /// Serialized HTML of the current document.
    async fn content(&self) -> Result<String, CapabilityError>;

    async fn locate(&self, selector: &Selector) -> Result<Vec<ElementHandle>, CapabilityError>;

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, CapabilityError>;

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), CapabilityError>;

    async fn read_value(&self, element: &ElementHandle) -> Result<String, CapabilityError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), CapabilityError>;

    async fn press_key(&self, combo: &str) -> Result<(), CapabilityError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, CapabilityError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, CapabilityError>;

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), CapabilityError>;

    async fn screenshot(&self, path: &str) -> Result<(), CapabilityError>;
}

pub const CLASSIFY_CONTENT_TASK: &str = "classify-content";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyContent {
    pub content_id: Uuid,
    pub account_id: AccountId,
}

impl ClassifyContent {
    pub fn into_task(self) -> Task {
        Task {
            name: CLASSIFY_CONTENT_TASK.to_string(),
            payload: serde_json::json!({
                "contentId": self.content_id,
                "accountId": self.account_id,
            }),
        }
    }

    pub fn from_task(task: &Task) -> Option<Self> {
        if task.name != CLASSIFY_CONTENT_TASK {
            return None;
        }
        serde_json::from_value(task.payload.clone()).ok()
    }
}

/// Fire-and-forget hand-off between ingestion and classification.
/// Delivery is at-least-once; handlers must tolerate repeats.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemContext {
    pub title: String,
    pub body: String,
    pub author: String,
    pub channel: String,
}

impl From<&ContentItem> for ItemContext {
    fn from(item: &ContentItem) -> Self {
        Self {
            title: item.title.clone(),
            body: item.body.clone().unwrap_or_default(),
            author: item.author.clone(),
            channel: item.channel.clone(),
        }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        persona_prompt: &str,
        context: &ItemContext,
    ) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Scraping,
    Break,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Scraping => "scraping",
            CyclePhase::Break => "break",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub account_id: AccountId,
    pub status: CyclePhase,
    pub items_found: usize,
    pub time_remaining_ms: u64,
}

/// Receives scrape cycle progress. Publishing never blocks the caller.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}
