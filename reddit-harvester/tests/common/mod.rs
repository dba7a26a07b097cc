#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use interfaces::defs::{
    Account, AccountMode, CapabilityError, ContentItem, Cookie, Draft, ElementHandle, NavigationResult, NewAccount,
    NewContentItem, PageController, Selector, SessionToken,
};
use interfaces::{InMemoryStore, Store};
use reddit_harvester::automation::{AccountAutomation, AdapterCache, AutomationFactory, PublishReport};
use reddit_harvester::types::{AutomationError, HarvestedItem};
use session_vault::{CredentialVault, SessionManager};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn session_token() -> SessionToken {
    SessionToken::new(vec![Cookie::new("reddit_session", "stub-session")])
}

/// Scripted account automation that counts what it was asked to do.
pub struct StubAutomation {
    pub items: Mutex<Vec<HarvestedItem>>,
    pub login_failure: Mutex<Option<String>>,
    pub session_accepted: AtomicBool,
    pub publish_report: Mutex<PublishReport>,
    pub publish_not_authenticated: AtomicBool,
    pub login_delay: Mutex<Duration>,
    session: Mutex<Option<SessionToken>>,
    pub login_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub publish_calls: AtomicUsize,
    pub published: Mutex<Vec<(Option<String>, String, String)>>,
}

impl StubAutomation {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            login_failure: Mutex::new(None),
            session_accepted: AtomicBool::new(true),
            publish_report: Mutex::new(PublishReport::verified()),
            publish_not_authenticated: AtomicBool::new(false),
            login_delay: Mutex::new(Duration::ZERO),
            session: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_items(&self, items: Vec<HarvestedItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fail_login(&self, reason: &str) {
        *self.login_failure.lock().unwrap() = Some(reason.to_string());
    }

    pub fn delay_login(&self, delay: Duration) {
        *self.login_delay.lock().unwrap() = delay;
    }

    pub fn set_publish_report(&self, report: PublishReport) {
        *self.publish_report.lock().unwrap() = report;
    }

    pub fn forget_session(&self) {
        *self.session.lock().unwrap() = None;
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountAutomation for StubAutomation {
    async fn login(&self, _username: &str, _secret: &str) -> Result<SessionToken, AutomationError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.login_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.login_failure.lock().unwrap().clone() {
            return Err(AutomationError::Authentication(reason));
        }
        let token = session_token();
        *self.session.lock().unwrap() = Some(token.clone());
        Ok(token)
    }

    async fn load_session(&self, token: SessionToken) {
        *self.session.lock().unwrap() = Some(token);
    }

    async fn has_session(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    async fn verify_session(&self, _token: &SessionToken) -> bool {
        self.session_accepted.load(Ordering::SeqCst)
    }

    async fn fetch_recent_items(
        &self,
        _channel: &str,
        _limit: usize,
        _recency_window: Duration,
    ) -> Result<Vec<HarvestedItem>, AutomationError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.lock().unwrap().clone())
    }

    async fn publish_reply(
        &self,
        target_url: Option<&str>,
        target_id: &str,
        text: &str,
    ) -> Result<PublishReport, AutomationError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.publish_not_authenticated.load(Ordering::SeqCst) {
            return Err(AutomationError::NotAuthenticated);
        }
        self.published.lock().unwrap().push((
            target_url.map(str::to_string),
            target_id.to_string(),
            text.to_string(),
        ));
        Ok(self.publish_report.lock().unwrap().clone())
    }
}

/// Hands out the same stub for every account.
pub struct StubFactory {
    pub automation: Arc<StubAutomation>,
    pub created: AtomicUsize,
}

impl AutomationFactory for StubFactory {
    fn create(&self, _account: &Account) -> Arc<dyn AccountAutomation> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.automation.clone()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub sessions: Arc<SessionManager>,
    pub automation: Arc<StubAutomation>,
    pub factory: Arc<StubFactory>,
    pub adapters: Arc<AdapterCache>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let vault = Arc::new(CredentialVault::new(CredentialVault::generate_key()));
        let sessions = Arc::new(SessionManager::new(store.clone(), vault));
        let automation = Arc::new(StubAutomation::new());
        let factory = Arc::new(StubFactory {
            automation: automation.clone(),
            created: AtomicUsize::new(0),
        });
        let adapters = Arc::new(AdapterCache::new(factory.clone()));
        Self {
            store,
            sessions,
            automation,
            factory,
            adapters,
        }
    }

    pub async fn account(&self, username: &str, mode: AccountMode) -> Account {
        self.store
            .create_account(NewAccount {
                username: username.to_string(),
                secret: "hunter2".to_string(),
                mode,
                persona_prompt: None,
            })
            .await
            .unwrap()
    }

    pub async fn content(&self, account: &Account, external_id: &str) -> ContentItem {
        self.store
            .insert_content_item(new_content(account, external_id))
            .await
            .unwrap()
            .unwrap()
    }

    /// Account, content item and pending draft, ready for approval.
    pub async fn pending_draft(&self, mode: AccountMode) -> (Account, ContentItem, Draft) {
        let account = self.account("poster", mode).await;
        let item = self.content(&account, "abc123").await;
        let draft = self
            .store
            .create_draft(account.id, item.id, "Happy to help, sending you a message now")
            .await
            .unwrap();
        (account, item, draft)
    }
}

pub fn new_content(account: &Account, external_id: &str) -> NewContentItem {
    NewContentItem {
        account_id: account.id,
        external_id: external_id.to_string(),
        channel: "rateme".to_string(),
        title: "Can you rate my outfit?".to_string(),
        body: None,
        author: "someone".to_string(),
        url: Some(format!("https://reddit.com/r/rateme/comments/{}/outfit/", external_id)),
        nsfw: false,
        media_present: false,
        raw_payload: serde_json::json!({ "id": external_id }),
    }
}

pub fn harvested(external_id: &str, title: &str) -> HarvestedItem {
    HarvestedItem {
        external_id: external_id.to_string(),
        channel: "rateme".to_string(),
        title: title.to_string(),
        body: None,
        author: "someone".to_string(),
        url: None,
        permalink: Some(format!("/r/rateme/comments/{}/post/", external_id)),
        nsfw: false,
        media_present: false,
        created_at: Utc::now(),
        raw: serde_json::json!({ "id": external_id, "title": title }),
    }
}

/// Page controller stub: selectors resolve to scripted elements, navigation
/// lands on scripted URLs and titles, and every call is recorded.
pub struct ScriptedPage {
    pub elements: Mutex<HashMap<String, Vec<ElementHandle>>>,
    pub values: Mutex<HashMap<String, String>>,
    /// Requested URL to (final URL, title, HTTP status).
    pub landing: Mutex<HashMap<String, (String, String, u16)>>,
    pub navigation_delay: Mutex<Duration>,
    pub url: Mutex<String>,
    pub title: Mutex<String>,
    pub content: Mutex<String>,
    pub cookies: Mutex<Vec<Cookie>>,
    /// URL the page moves to once something is clicked or Enter is pressed.
    pub after_submit_url: Mutex<Option<String>>,
    /// Markup the page shows once something is clicked.
    pub after_submit_content: Mutex<Option<String>>,
    /// Markup the page switches to once the clock reaches the instant.
    pub content_at: Mutex<Option<(tokio::time::Instant, String)>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self {
            elements: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            landing: Mutex::new(HashMap::new()),
            navigation_delay: Mutex::new(Duration::ZERO),
            url: Mutex::new("about:blank".to_string()),
            title: Mutex::new(String::new()),
            content: Mutex::new(String::new()),
            cookies: Mutex::new(Vec::new()),
            after_submit_url: Mutex::new(None),
            after_submit_content: Mutex::new(None),
            content_at: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn element(&self, selector: Selector, id: &str) {
        self.elements
            .lock()
            .unwrap()
            .entry(selector.to_string())
            .or_default()
            .push(ElementHandle { id: id.to_string() });
    }

    pub fn lands(&self, url: &str, final_url: &str, title: &str) {
        self.lands_with_status(url, final_url, title, 200);
    }

    pub fn lands_with_status(&self, url: &str, final_url: &str, title: &str, status: u16) {
        self.landing
            .lock()
            .unwrap()
            .insert(url.to_string(), (final_url.to_string(), title.to_string(), status));
    }

    pub fn without_element(&self, selector: Selector) {
        self.elements.lock().unwrap().remove(&selector.to_string());
    }

    pub fn set_content(&self, content: &str) {
        *self.content.lock().unwrap() = content.to_string();
    }

    pub fn content_after(&self, delay: Duration, content: &str) {
        *self.content_at.lock().unwrap() = Some((tokio::time::Instant::now() + delay, content.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("navigate ").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn submitted(&self) {
        if let Some(url) = self.after_submit_url.lock().unwrap().clone() {
            *self.url.lock().unwrap() = url;
        }
        if let Some(content) = self.after_submit_content.lock().unwrap().clone() {
            *self.content.lock().unwrap() = content;
        }
    }
}

#[async_trait]
impl PageController for ScriptedPage {
    async fn open(&self) -> Result<(), CapabilityError> {
        self.record("open".to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        self.record("close".to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<NavigationResult, CapabilityError> {
        self.record(format!("navigate {}", url));
        let delay = *self.navigation_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let (final_url, title, status) = self
            .landing
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| (url.to_string(), "Page not found".to_string(), 404));
        *self.url.lock().unwrap() = final_url.clone();
        *self.title.lock().unwrap() = title.clone();
        Ok(NavigationResult {
            url: final_url,
            title,
            status: Some(status),
        })
    }

    async fn current_url(&self) -> Result<String, CapabilityError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String, CapabilityError> {
        Ok(self.title.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String, CapabilityError> {
        let mut scheduled = self.content_at.lock().unwrap();
        if scheduled.as_ref().is_some_and(|(at, _)| tokio::time::Instant::now() >= *at) {
            if let Some((_, content)) = scheduled.take() {
                *self.content.lock().unwrap() = content;
            }
        }
        drop(scheduled);
        Ok(self.content.lock().unwrap().clone())
    }

    async fn locate(&self, selector: &Selector) -> Result<Vec<ElementHandle>, CapabilityError> {
        Ok(self
            .elements
            .lock()
            .unwrap()
            .get(&selector.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn is_visible(&self, _element: &ElementHandle) -> Result<bool, CapabilityError> {
        Ok(true)
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), CapabilityError> {
        self.record(format!("fill {}", element.id));
        self.values.lock().unwrap().insert(element.id.clone(), text.to_string());
        Ok(())
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<String, CapabilityError> {
        Ok(self.values.lock().unwrap().get(&element.id).cloned().unwrap_or_default())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), CapabilityError> {
        self.record(format!("click {}", element.id));
        self.submitted();
        Ok(())
    }

    async fn press_key(&self, combo: &str) -> Result<(), CapabilityError> {
        self.record(format!("press {}", combo));
        self.submitted();
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, CapabilityError> {
        Ok(serde_json::Value::String("complete".to_string()))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, CapabilityError> {
        Ok(self.cookies.lock().unwrap().clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), CapabilityError> {
        self.record("set_cookies".to_string());
        self.cookies.lock().unwrap().extend_from_slice(cookies);
        Ok(())
    }

    async fn screenshot(&self, path: &str) -> Result<(), CapabilityError> {
        self.record(format!("screenshot {}", path));
        Ok(())
    }
}
