use crate::types::{AutomationError, FetchConfig, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

/// Read-only HTTP client for channel listings, with per-host spacing and retries.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// `{base}/r/{channel}/new.json?limit={limit}&t=hour`
    pub fn listing_url(&self, channel: &str, limit: usize) -> Result<String> {
        let mut url = Url::parse(&self.config.listing_base_url)
            .map_err(|e| AutomationError::Parse(format!("invalid listing base url: {}", e)))?;
        url.set_path(&format!("/r/{}/new.json", channel));
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("t", "hour");
        Ok(url.to_string())
    }

    /// Fetches a listing body, retrying transient failures with exponential backoff.
    /// The cookie header is sent when present so listings reflect the account's view.
    pub async fn fetch_listing(&self, url: &str, cookie_header: Option<&str>) -> Result<String> {
        debug!("Fetching listing: {}", url);

        self.apply_rate_limit(url).await?;

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.send(url, cookie_header).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        match response.text().await {
                            Ok(body) => {
                                info!("Fetched listing {} ({} bytes)", url, body.len());
                                return Ok(body);
                            }
                            Err(e) => last_error = Some(AutomationError::Http(e)),
                        }
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(AutomationError::RateLimited(format!("HTTP 429 from {}", url)));
                    } else if status.is_client_error() {
                        // 4xx other than 429 will not improve on retry
                        return Err(AutomationError::Unknown(format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("Unknown")
                        )));
                    } else {
                        last_error = Some(AutomationError::Unknown(format!(
                            "HTTP {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("Unknown")
                        )));
                    }
                }
                Err(e) => last_error = Some(e),
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Failed to fetch listing after {} attempts: {}", self.config.max_retries + 1, url);
        Err(last_error.unwrap_or_else(|| AutomationError::Unknown("listing fetch failed".to_string())))
    }

    async fn send(&self, url: &str, cookie_header: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url).header("Accept", "application/json");

        if let Some(cookies) = cookie_header.filter(|c| !c.is_empty()) {
            request = request.header("Cookie", cookies);
        }

        Ok(request.send().await?)
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url).map_err(|e| AutomationError::Parse(format!("invalid url {}: {}", url, e)))?;
        let host = parsed_url.host_str().unwrap_or("").to_string();

        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);

        // Reserve this request's slot under the lock, wait outside it.
        let wait_time = {
            let mut rate_limiter = self.rate_limiter.write().await;
            let now = Instant::now();
            let slot = match rate_limiter.get(&host) {
                Some(last) if *last + min_interval > now => *last + min_interval,
                _ => now,
            };
            rate_limiter.insert(host.clone(), slot);
            slot.saturating_duration_since(now)
        };

        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        Ok(())
    }
}
