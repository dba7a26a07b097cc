use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use interfaces::defs::{Account, CapabilityError, PageController, Selector, SessionToken};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::challenge::{self, VerificationSignals};
use super::http_page::HttpPageController;
use super::strategies::{self, first_match, Interaction, StrategyOutcome};
use super::{AccountAutomation, AutomationFactory, PublishFailure, PublishReport};
use crate::fetcher::Fetcher;
use crate::parser::ListingParser;
use crate::types::{AutomationError, BrowserConfig, HarvestedItem, Result};

const READY_POLLS: usize = 10;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOGIN_REDIRECT_POLLS: usize = 10;
const LOGIN_REDIRECT_INTERVAL: Duration = Duration::from_secs(1);

/// Reddit automation over a page controller (login, verify, publish) and a
/// plain HTTP fetcher (listings).
///
/// One page per instance; page work is serialized.
pub struct RedditAutomation {
    page: Arc<dyn PageController>,
    fetcher: Arc<Fetcher>,
    config: BrowserConfig,
    session: RwLock<Option<SessionToken>>,
    page_lock: Mutex<()>,
}

impl RedditAutomation {
    pub fn new(page: Arc<dyn PageController>, fetcher: Arc<Fetcher>, config: BrowserConfig) -> Self {
        Self {
            page,
            fetcher,
            config,
            session: RwLock::new(None),
            page_lock: Mutex::new(()),
        }
    }

    async fn close_page(&self) {
        if let Err(e) = self.page.close().await {
            debug!("Closing page failed: {}", e);
        }
    }

    async fn wait_until_ready(&self) {
        for _ in 0..READY_POLLS {
            match self.page.evaluate("document.readyState").await {
                Ok(state) if state.as_str() == Some("complete") => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("readyState check failed: {}", e);
                    return;
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn login_steps(&self, username: &str, secret: &str) -> Result<SessionToken> {
        self.page
            .navigate(&self.config.login_url, self.config.navigation_timeout)
            .await?;
        self.wait_until_ready().await;

        match first_match(self.page.as_ref(), &strategies::username_strategies(), Interaction::Fill(username)).await {
            StrategyOutcome::Found { strategy, .. } => debug!("Username field via {}", strategy),
            StrategyOutcome::NotFound => {
                return Err(AutomationError::Authentication("username field not found".to_string()))
            }
            StrategyOutcome::Error(e) => return Err(AutomationError::Authentication(format!("username field: {}", e))),
        }

        match first_match(self.page.as_ref(), &strategies::password_strategies(), Interaction::Fill(secret)).await {
            StrategyOutcome::Found { strategy, .. } => debug!("Password field via {}", strategy),
            StrategyOutcome::NotFound => {
                return Err(AutomationError::Authentication("password field not found".to_string()))
            }
            StrategyOutcome::Error(e) => return Err(AutomationError::Authentication(format!("password field: {}", e))),
        }

        if !first_match(self.page.as_ref(), &strategies::login_submit_strategies(), Interaction::Click)
            .await
            .is_found()
        {
            debug!("No submit control matched, submitting with Enter");
            self.page.press_key("Enter").await?;
        }

        let mut url = self.page.current_url().await?;
        for _ in 0..LOGIN_REDIRECT_POLLS {
            if !challenge::is_auth_page(&url) {
                break;
            }
            tokio::time::sleep(LOGIN_REDIRECT_INTERVAL).await;
            url = self.page.current_url().await?;
        }

        if challenge::is_auth_page(&url) {
            return Err(AutomationError::Authentication("still on the login page after submitting".to_string()));
        }

        let token = SessionToken::new(self.page.cookies().await?);
        if !token.has_any_cookie(&self.config.session_cookie_names) {
            return Err(AutomationError::Authentication("no session cookie after login".to_string()));
        }

        Ok(token)
    }

    async fn authenticated_marker_present(&self) -> std::result::Result<bool, CapabilityError> {
        let markers = [
            Selector::css("#expand-user-drawer-button"),
            Selector::css(r#"[data-testid="user-drawer-button"]"#),
            Selector::css("#USER_DROPDOWN_ID"),
            Selector::css("span.user a"),
        ];
        for marker in &markers {
            for element in self.page.locate(marker).await? {
                if self.page.is_visible(&element).await? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Tries each candidate URL until one lands on a live post.
    async fn navigate_to_target(&self, target_url: Option<&str>, target_id: &str) -> Result<String> {
        let candidates = target_candidates(target_url, target_id);
        if candidates.is_empty() {
            return Err(AutomationError::NavigationFailed("no usable target url or id".to_string()));
        }

        for candidate in &candidates {
            match self.page.navigate(candidate, self.config.navigation_timeout).await {
                Ok(nav) => {
                    let status = nav.status;
                    let url = self.page.current_url().await.unwrap_or(nav.url);
                    let title = if nav.title.is_empty() {
                        self.page.title().await.unwrap_or_default()
                    } else {
                        nav.title
                    };
                    if challenge::is_live_content_page(&url, &title, status) {
                        debug!("Landed on {} via {}", url, candidate);
                        return Ok(url);
                    }
                    debug!(
                        "{} did not land on a live post (status {:?}, title {:?})",
                        candidate, status, title
                    );
                }
                Err(e) => debug!("Navigation to {} failed: {}", candidate, e),
            }
        }

        Err(AutomationError::NavigationFailed(format!(
            "no live post among {} candidate urls",
            candidates.len()
        )))
    }

    /// Waits for a challenge to clear, up to the configured bound. Never fails.
    async fn wait_out_challenge(&self) {
        if !challenge::challenge_present(self.page.as_ref()).await {
            return;
        }

        warn!("Anti-automation challenge detected, waiting for it to clear");
        let deadline = Instant::now() + self.config.challenge_timeout;
        loop {
            tokio::time::sleep(self.config.challenge_poll_interval).await;
            if !challenge::challenge_present(self.page.as_ref()).await {
                info!("Challenge cleared");
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Challenge still present after {:?}, continuing",
                    self.config.challenge_timeout
                );
                return;
            }
        }
    }

    async fn read_signals(&self, target_id: &str, text: &str) -> Result<VerificationSignals> {
        let content = self.page.content().await?;
        let url = self.page.current_url().await?;
        Ok(VerificationSignals::read(&content, &url, target_id, text))
    }

    async fn publish_steps(&self, token: &SessionToken, target_url: Option<&str>, target_id: &str, text: &str) -> Result<()> {
        self.page.set_cookies(&token.cookies).await?;
        self.navigate_to_target(target_url, target_id).await?;
        self.wait_until_ready().await;
        self.wait_out_challenge().await;

        // Collapsed composers need a click before the input exists.
        first_match(self.page.as_ref(), &strategies::composer_opener_strategies(), Interaction::Click).await;

        match first_match(self.page.as_ref(), &strategies::reply_input_strategies(), Interaction::Fill(text)).await {
            StrategyOutcome::Found { strategy, .. } => debug!("Reply input via {}", strategy),
            StrategyOutcome::NotFound => {
                return Err(AutomationError::InputNotFound("no reply input accepted the text".to_string()))
            }
            StrategyOutcome::Error(e) => return Err(AutomationError::InputNotFound(e.to_string())),
        }

        // Comments already on the page, so only new ones count as ours.
        let before = self.read_signals(target_id, text).await?;

        if !first_match(self.page.as_ref(), &strategies::reply_submit_strategies(), Interaction::Click)
            .await
            .is_found()
        {
            debug!("No submit control matched, submitting with Control+Enter");
            self.page.press_key("Control+Enter").await?;
        }

        tokio::time::sleep(self.config.settle_delay).await;
        let signals = self.read_signals(target_id, text).await?;
        if signals.landed_since(&before) {
            return Ok(());
        }

        if signals.rate_limited {
            // Rate-limited replies sometimes land late; look once more.
            warn!(
                "Rate limit indicator after submit, rechecking in {:?}",
                self.config.rate_limit_recheck_delay
            );
            tokio::time::sleep(self.config.rate_limit_recheck_delay).await;
            let recheck = self.read_signals(target_id, text).await?;
            if recheck.landed_since(&before) {
                info!("Reply to {} appeared after rate limit recheck", target_id);
                return Ok(());
            }
            return Err(AutomationError::RateLimited(
                "platform reported a rate limit and the reply did not appear".to_string(),
            ));
        }

        Err(AutomationError::VerificationFailed(format!("{:?}", signals)))
    }

    async fn capture_failure(&self, target_id: &str) {
        let Some(dir) = &self.config.screenshot_dir else {
            return;
        };
        let path = format!("{}/publish-{}-{}.png", dir.trim_end_matches('/'), target_id, Utc::now().timestamp());
        match self.page.screenshot(&path).await {
            Ok(()) => info!("Saved failure screenshot to {}", path),
            Err(e) => debug!("Failure screenshot not captured: {}", e),
        }
    }
}

/// Ordered URLs to try for a post: the given URL when it is a usable reddit
/// URL, then fallbacks built from the post id.
pub fn target_candidates(target_url: Option<&str>, target_id: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(raw) = target_url {
        match Url::parse(raw.trim()) {
            Ok(url)
                if matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|h| h.ends_with("reddit.com")) =>
            {
                candidates.push(url.to_string());
            }
            _ => debug!("Ignoring unusable target url {:?}", raw),
        }
    }

    let id = target_id.trim().trim_start_matches("t3_");
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        candidates.push(format!("https://www.reddit.com/comments/{}", id));
        candidates.push(format!("https://old.reddit.com/comments/{}", id));
        candidates.push(format!("https://www.reddit.com/by_id/t3_{}", id));
    }

    candidates.dedup();
    candidates
}

#[async_trait]
impl AccountAutomation for RedditAutomation {
    async fn login(&self, username: &str, secret: &str) -> Result<SessionToken> {
        let _page = self.page_lock.lock().await;
        self.page
            .open()
            .await
            .map_err(|e| AutomationError::Authentication(format!("browser unavailable: {}", e)))?;

        let outcome = tokio::time::timeout(self.config.login_timeout, self.login_steps(username, secret)).await;
        self.close_page().await;

        let token = match outcome {
            Ok(Ok(token)) => token,
            Ok(Err(AutomationError::Authentication(reason))) => return Err(AutomationError::Authentication(reason)),
            Ok(Err(e)) => return Err(AutomationError::Authentication(e.to_string())),
            Err(_) => {
                return Err(AutomationError::Authentication(format!(
                    "login timed out after {:?}",
                    self.config.login_timeout
                )))
            }
        };

        info!("Logged in as {}", username);
        *self.session.write().await = Some(token.clone());
        Ok(token)
    }

    async fn load_session(&self, token: SessionToken) {
        *self.session.write().await = Some(token);
    }

    async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn verify_session(&self, token: &SessionToken) -> bool {
        let _page = self.page_lock.lock().await;

        let check = async {
            self.page.open().await?;
            self.page.set_cookies(&token.cookies).await?;
            self.page
                .navigate(&self.config.home_url, self.config.verify_timeout)
                .await?;
            self.authenticated_marker_present().await
        };

        let outcome = tokio::time::timeout(self.config.verify_timeout, check).await;
        self.close_page().await;

        match outcome {
            Ok(Ok(authenticated)) => authenticated,
            Ok(Err(e)) => {
                warn!("Session check failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "Session check timed out after {:?}, treating session as usable",
                    self.config.verify_timeout
                );
                true
            }
        }
    }

    async fn fetch_recent_items(
        &self,
        channel: &str,
        limit: usize,
        recency_window: Duration,
    ) -> Result<Vec<HarvestedItem>> {
        let channels: Vec<String> = if channel.eq_ignore_ascii_case("all") {
            self.fetcher.config().fanout_channels.clone()
        } else {
            vec![channel.to_string()]
        };
        let window = chrono::Duration::from_std(recency_window)
            .map_err(|e| AutomationError::Parse(format!("recency window: {}", e)))?;
        let cookie_header = self.session.read().await.as_ref().map(|t| t.cookie_header());

        let now = Utc::now();
        let mut parser = ListingParser::new();
        let mut items = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for name in &channels {
            let fetched = match self.fetcher.listing_url(name, limit) {
                Ok(url) => self.fetcher.fetch_listing(&url, cookie_header.as_deref()).await,
                Err(e) => Err(e),
            };
            match fetched.and_then(|body| parser.parse(&body, now, window)) {
                Ok(batch) => {
                    debug!("{} recent item(s) from r/{}", batch.len(), name);
                    items.extend(batch);
                }
                Err(e) => {
                    warn!("Fetching r/{} failed: {}", name, e);
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures == channels.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(items)
    }

    async fn publish_reply(&self, target_url: Option<&str>, target_id: &str, text: &str) -> Result<PublishReport> {
        let Some(token) = self.session.read().await.clone() else {
            return Err(AutomationError::NotAuthenticated);
        };

        let _page = self.page_lock.lock().await;
        self.page.open().await?;

        let report = match self.publish_steps(&token, target_url, target_id, text).await {
            Ok(()) => {
                info!("Reply to {} verified", target_id);
                PublishReport::verified()
            }
            Err(e) => match PublishFailure::classify(e) {
                Ok(failure) => {
                    warn!("Reply to {} not verified: {}", target_id, failure.describe());
                    self.capture_failure(target_id).await;
                    PublishReport::failed(failure)
                }
                Err(fatal) => {
                    self.close_page().await;
                    return Err(fatal);
                }
            },
        };

        self.close_page().await;
        Ok(report)
    }
}

/// Builds one `RedditAutomation` per account, each with its own sidecar page.
pub struct RedditAutomationFactory {
    fetcher: Arc<Fetcher>,
    config: BrowserConfig,
    client: reqwest::Client,
}

impl RedditAutomationFactory {
    pub fn new(fetcher: Arc<Fetcher>, config: BrowserConfig) -> Self {
        Self {
            fetcher,
            config,
            client: reqwest::Client::new(),
        }
    }
}

impl AutomationFactory for RedditAutomationFactory {
    fn create(&self, account: &Account) -> Arc<dyn AccountAutomation> {
        debug!(account_id = %account.id, "Creating automation instance");
        let page = Arc::new(HttpPageController::with_client(
            self.client.clone(),
            &self.config.page_controller_url,
        ));
        Arc::new(RedditAutomation::new(page, self.fetcher.clone(), self.config.clone()))
    }
}
