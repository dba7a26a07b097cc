use std::time::Duration;

use async_trait::async_trait;
use interfaces::defs::{CapabilityError, Cookie, ElementHandle, NavigationResult, PageController, Selector};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Page controller backed by a browser sidecar speaking JSON over HTTP:
/// `POST /session/open`, `POST /session/{id}/command`, `POST /session/{id}/close`.
pub struct HttpPageController {
    client: Client,
    base_url: String,
    session_id: RwLock<Option<String>>,
}

impl HttpPageController {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: RwLock::new(None),
        }
    }

    async fn current_session(&self) -> Result<String, CapabilityError> {
        self.session_id
            .read()
            .await
            .clone()
            .ok_or_else(|| CapabilityError::Failed("page is not open".to_string()))
    }

    async fn command<T: DeserializeOwned>(&self, name: &str, args: Value, timeout: Duration) -> Result<T, CapabilityError> {
        let session_id = self.current_session().await?;
        let mut body = json!({ "command": name });
        if let (Value::Object(target), Value::Object(extra)) = (&mut body, args) {
            target.extend(extra);
        }

        let response = self
            .client
            .post(format!("{}/session/{}/command", self.base_url, session_id))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Failed(format!("{} returned HTTP {}", name, status)));
        }

        let reply: CommandResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Failed(format!("{} reply: {}", name, e)))?;

        if !reply.ok {
            return Err(CapabilityError::Failed(
                reply.error.unwrap_or_else(|| format!("{} failed", name)),
            ));
        }

        serde_json::from_value(reply.result).map_err(|e| CapabilityError::Failed(format!("{} result: {}", name, e)))
    }

    async fn command_unit(&self, name: &str, args: Value) -> Result<(), CapabilityError> {
        let _: Value = self.command(name, args, DEFAULT_COMMAND_TIMEOUT).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> CapabilityError {
    if e.is_timeout() {
        CapabilityError::Timeout(timeout)
    } else if e.is_connect() {
        CapabilityError::Unavailable(e.to_string())
    } else {
        CapabilityError::Failed(e.to_string())
    }
}

#[async_trait]
impl PageController for HttpPageController {
    async fn open(&self) -> Result<(), CapabilityError> {
        let response = self
            .client
            .post(format!("{}/session/open", self.base_url))
            .timeout(DEFAULT_COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(e, DEFAULT_COMMAND_TIMEOUT))?;

        if !response.status().is_success() {
            return Err(CapabilityError::Unavailable(format!(
                "page sidecar returned HTTP {}",
                response.status()
            )));
        }

        let opened: OpenResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Failed(format!("open reply: {}", e)))?;
        debug!("Opened page session {}", opened.session_id);
        *self.session_id.write().await = Some(opened.session_id);
        Ok(())
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };
        self.client
            .post(format!("{}/session/{}/close", self.base_url, session_id))
            .timeout(DEFAULT_COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(e, DEFAULT_COMMAND_TIMEOUT))?;
        Ok(())
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationResult, CapabilityError> {
        self.command(
            "navigate",
            json!({ "url": url, "timeoutMs": timeout.as_millis() as u64 }),
            timeout + NAVIGATION_SLACK,
        )
        .await
    }

    async fn current_url(&self) -> Result<String, CapabilityError> {
        self.command("currentUrl", json!({}), DEFAULT_COMMAND_TIMEOUT).await
    }

    async fn title(&self) -> Result<String, CapabilityError> {
        self.command("title", json!({}), DEFAULT_COMMAND_TIMEOUT).await
    }

    async fn content(&self) -> Result<String, CapabilityError> {
        self.command("content", json!({}), DEFAULT_COMMAND_TIMEOUT).await
    }

    async fn locate(&self, selector: &Selector) -> Result<Vec<ElementHandle>, CapabilityError> {
        self.command("locate", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, CapabilityError> {
        self.command("isVisible", json!({ "element": element }), DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), CapabilityError> {
        self.command_unit("fill", json!({ "element": element, "text": text })).await
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<String, CapabilityError> {
        self.command("readValue", json!({ "element": element }), DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), CapabilityError> {
        self.command_unit("click", json!({ "element": element })).await
    }

    async fn press_key(&self, combo: &str) -> Result<(), CapabilityError> {
        self.command_unit("pressKey", json!({ "combo": combo })).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, CapabilityError> {
        self.command("evaluate", json!({ "script": script }), DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, CapabilityError> {
        self.command("cookies", json!({}), DEFAULT_COMMAND_TIMEOUT).await
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), CapabilityError> {
        self.command_unit("setCookies", json!({ "cookies": cookies })).await
    }

    async fn screenshot(&self, path: &str) -> Result<(), CapabilityError> {
        self.command_unit("screenshot", json!({ "path": path })).await
    }
}
