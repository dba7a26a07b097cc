use std::sync::Arc;

use chrono::Utc;
use interfaces::defs::{ContentItem, Draft, DraftStatus, PublishAttempt};
use interfaces::state::Store;
use serde::Serialize;
use session_vault::SessionManager;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::automation::{ensure_session, AdapterCache, PublishFailure};
use crate::types::WorkflowError;

/// Result of an approval. A failed publish is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub draft_id: Uuid,
    pub approved: bool,
    pub publish_requested: bool,
    pub published: bool,
    /// Set when a rate-limited publish might still have landed.
    pub needs_review: bool,
    pub message: String,
}

pub struct ApprovalWorkflow {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    adapters: Arc<AdapterCache>,
    session_ttl_hours: i64,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        adapters: Arc<AdapterCache>,
        session_ttl_hours: i64,
    ) -> Self {
        Self {
            store,
            sessions,
            adapters,
            session_ttl_hours,
        }
    }

    pub async fn approve_and_publish(&self, draft_id: Uuid, publish: bool) -> Result<ApprovalOutcome, WorkflowError> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("draft", draft_id))?;
        let item = self
            .store
            .get_content_item(draft.content_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("content item", draft.content_id))?;
        let account = self
            .store
            .get_account(draft.account_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("account", draft.account_id))?;

        if draft.status.is_terminal() {
            return Err(WorkflowError::InvalidState(format!(
                "draft {} is already {}",
                draft_id,
                draft.status.as_str()
            )));
        }
        if !account.has_credentials() {
            return Err(WorkflowError::InvalidState(format!(
                "account {} has no credentials",
                account.username
            )));
        }
        if publish && !account.mode.can_publish() {
            return Err(WorkflowError::InvalidState(format!(
                "account {} is scrape-only and cannot publish",
                account.username
            )));
        }

        self.store.set_draft_approved(draft_id).await?;
        info!(draft_id = %draft_id, "Draft approved");

        if !publish {
            return Ok(ApprovalOutcome {
                draft_id,
                approved: true,
                publish_requested: false,
                published: false,
                needs_review: false,
                message: "Draft approved".to_string(),
            });
        }

        let automation = self.adapters.resolve(&account).await;
        if let Err(e) = ensure_session(automation.as_ref(), &self.sessions, &account, self.session_ttl_hours).await {
            let message = format!("could not obtain a session: {}", e);
            self.record_failure(&draft, &message).await;
            return Ok(self.failed(draft_id, message, false));
        }

        let target_url = reply_target_url(&item);
        let report = match automation
            .publish_reply(target_url.as_deref(), &item.external_id, &draft.text)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                let message = e.to_string();
                self.record_failure(&draft, &message).await;
                return Ok(self.failed(draft_id, message, false));
            }
        };

        if report.verified {
            self.store
                .record_publish_success(PublishAttempt::succeeded(&draft))
                .await?;
            if let Err(e) = self.store.touch_account(account.id, Utc::now()).await {
                warn!(account_id = %account.id, "Could not stamp last activity: {}", e);
            }
            info!(draft_id = %draft_id, content_id = %item.id, "Reply published");
            return Ok(ApprovalOutcome {
                draft_id,
                approved: true,
                publish_requested: true,
                published: true,
                needs_review: false,
                message: "Reply published".to_string(),
            });
        }

        let failure = report
            .failure
            .unwrap_or_else(|| PublishFailure::Unknown("publish was not verified".to_string()));
        let message = failure.describe();
        self.record_failure(&draft, &message).await;

        let needs_review = failure.is_rate_limited();
        if needs_review {
            // The reply may have landed; a person decides instead of a retry.
            let note = format!("rate limited during publish, check the thread before retrying: {}", message);
            if let Err(e) = self.store.flag_draft_for_review(draft_id, &note).await {
                warn!(draft_id = %draft_id, "Could not flag draft for review: {}", e);
            }
        }

        Ok(self.failed(draft_id, message, needs_review))
    }

    /// Rejects a pending draft. Rejecting a rejected draft is a no-op.
    pub async fn reject(&self, draft_id: Uuid) -> Result<(), WorkflowError> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("draft", draft_id))?;

        match draft.status {
            DraftStatus::Rejected => Ok(()),
            DraftStatus::Posted => Err(WorkflowError::InvalidState(format!(
                "draft {} was already posted",
                draft_id
            ))),
            DraftStatus::Pending => {
                self.store.reject_draft(draft_id).await?;
                info!(draft_id = %draft_id, "Draft rejected");
                Ok(())
            }
        }
    }

    /// Failed attempts are written on their own so they outlive later errors.
    async fn record_failure(&self, draft: &Draft, message: &str) {
        warn!(draft_id = %draft.id, "Publish failed: {}", message);
        if let Err(e) = self
            .store
            .append_publish_attempt(PublishAttempt::failed(draft, message))
            .await
        {
            error!(draft_id = %draft.id, "Could not record failed publish attempt: {}", e);
        }
    }

    fn failed(&self, draft_id: Uuid, message: String, needs_review: bool) -> ApprovalOutcome {
        ApprovalOutcome {
            draft_id,
            approved: true,
            publish_requested: true,
            published: false,
            needs_review,
            message,
        }
    }
}

/// Stored URL first, then the captured permalink, then a URL built from the id.
pub fn reply_target_url(item: &ContentItem) -> Option<String> {
    if let Some(url) = item.url.as_deref().filter(|u| !u.trim().is_empty()) {
        return Some(url.to_string());
    }
    if let Some(permalink) = item.raw_payload.get("permalink").and_then(|p| p.as_str()) {
        if permalink.starts_with("http") {
            return Some(permalink.to_string());
        }
        if permalink.starts_with('/') {
            return Some(format!("https://www.reddit.com{}", permalink));
        }
    }
    let id = item.external_id.trim().trim_start_matches("t3_");
    if id.is_empty() {
        None
    } else {
        Some(format!("https://www.reddit.com/comments/{}", id))
    }
}
