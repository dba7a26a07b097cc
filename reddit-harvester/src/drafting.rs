use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use interfaces::defs::{CapabilityError, GenerationService, ItemContext};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::DraftConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_prompt: &'a str,
    persona_prompt: &'a str,
    content: &'a ItemContext,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    draft: Option<String>,
}

/// Text generation over HTTP: `POST {base}/generate` returning `{"draft": "..."}`.
pub struct HttpGenerationService {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpGenerationService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/generate", base_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(
        &self,
        system_prompt: &str,
        persona_prompt: &str,
        context: &ItemContext,
    ) -> Result<String, CapabilityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&GenerateRequest {
                system_prompt,
                persona_prompt,
                content: context,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout(self.timeout)
                } else {
                    CapabilityError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CapabilityError::Failed(format!("generation returned HTTP {}", response.status())));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Failed(format!("generation reply: {}", e)))?;

        body.draft
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CapabilityError::Failed("generation reply had no draft".to_string()))
    }
}

/// Produces draft text, preferring the generation service and falling back
/// to a template so a qualifying item always gets a draft.
pub struct DraftComposer {
    generator: Arc<dyn GenerationService>,
    config: DraftConfig,
}

impl DraftComposer {
    pub fn new(generator: Arc<dyn GenerationService>, config: DraftConfig) -> Self {
        Self { generator, config }
    }

    pub async fn compose(&self, persona_prompt: &str, context: &ItemContext) -> String {
        match self
            .generator
            .generate(&self.config.system_prompt, persona_prompt, context)
            .await
        {
            Ok(text) => {
                debug!("Generated draft for post in r/{}", context.channel);
                text
            }
            Err(e) => {
                warn!("Generation unavailable, using template: {}", e);
                fallback_reply(context)
            }
        }
    }
}

pub fn fallback_reply(context: &ItemContext) -> String {
    let channel = context.channel.to_lowercase();
    let title = context.title.to_lowercase();

    if channel.contains("rate") || title.contains("rate") {
        "Hey! Thanks for sharing. I'd be happy to give you some feedback. \
         Feel free to DM me if you want to chat more or have any questions!"
            .to_string()
    } else if title.contains("help") || title.contains("advice") {
        "I'd be happy to help! Feel free to reach out if you want to talk it through.".to_string()
    } else {
        "Thanks for the post! I found this interesting and would love to engage. \
         Feel free to DM me if you want to continue the conversation!"
            .to_string()
    }
}
