use std::sync::Arc;

use async_trait::async_trait;
use interfaces::defs::{
    AccountId, CapabilityError, ClassifyContent, ContentStatus, ItemContext, Task, TaskDispatcher,
};
use interfaces::state::{Store, StoreError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{Classification, RelevanceClassifier};
use crate::drafting::DraftComposer;
use crate::types::WorkflowError;

/// In-process task queue on an unbounded channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<Task>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskDispatcher for ChannelDispatcher {
    async fn enqueue(&self, task: Task) -> Result<(), CapabilityError> {
        self.sender
            .send(task)
            .map_err(|e| CapabilityError::Unavailable(format!("task queue closed, dropped {}", e.0.name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub content_id: Uuid,
    pub classification: Classification,
    /// Set when this run created a draft.
    pub draft_id: Option<Uuid>,
}

/// Handler for `classify-content` tasks: classify, persist, and draft a reply
/// for qualifying items. Safe to run more than once for the same item.
pub struct ClassificationWorker {
    store: Arc<dyn Store>,
    classifier: RelevanceClassifier,
    composer: DraftComposer,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl ClassificationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: RelevanceClassifier,
        composer: DraftComposer,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            store,
            classifier,
            composer,
            dispatcher,
        }
    }

    /// Drains the queue until every sender is gone. Task failures are logged.
    pub async fn run(self: Arc<Self>, mut tasks: mpsc::UnboundedReceiver<Task>) {
        info!("Classification worker started");
        while let Some(task) = tasks.recv().await {
            match self.handle(&task).await {
                Ok(Some(outcome)) => debug!(
                    content_id = %outcome.content_id,
                    "Classified as {:?} (score {:.2})",
                    outcome.classification.intent.intent,
                    outcome.classification.intent_score
                ),
                Ok(None) => debug!("Ignored task {}", task.name),
                Err(e) => warn!("Task {} failed: {}", task.name, e),
            }
        }
        info!("Classification worker stopped");
    }

    /// Returns `None` for tasks this worker does not handle.
    pub async fn handle(&self, task: &Task) -> Result<Option<ClassificationOutcome>, WorkflowError> {
        match ClassifyContent::from_task(task) {
            Some(request) => self
                .classify_content(request.content_id, request.account_id)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub async fn classify_content(
        &self,
        content_id: Uuid,
        account_id: AccountId,
    ) -> Result<ClassificationOutcome, WorkflowError> {
        let item = self
            .store
            .get_content_item(content_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("content item", content_id))?;

        let variants: Vec<String> = self
            .store
            .keywords_for_account(account_id)
            .await?
            .into_iter()
            .flat_map(|k| k.variants)
            .collect();

        let body = item.body.clone().unwrap_or_default();
        let classification = self.classifier.classify(&variants, &item.channel, &item.title, &body);

        // A posted item keeps its status; only the scores are refreshed.
        let mut update = classification.update();
        if item.status == ContentStatus::Posted {
            update.status = ContentStatus::Posted;
        }
        self.store.apply_classification(content_id, update).await?;

        let mut outcome = ClassificationOutcome {
            content_id,
            classification,
            draft_id: None,
        };

        if !classification.draft_eligible {
            return Ok(outcome);
        }

        if self.store.draft_for_content(content_id).await?.is_some() {
            debug!(content_id = %content_id, "Draft already exists, skipping generation");
            return Ok(outcome);
        }

        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("account", account_id))?;
        let persona = account.persona_prompt.clone().unwrap_or_else(|| account.username.clone());

        let text = self.composer.compose(&persona, &ItemContext::from(&item)).await;

        match self.store.create_draft(account_id, content_id, &text).await {
            Ok(draft) => {
                info!(content_id = %content_id, draft_id = %draft.id, "Draft created");
                outcome.draft_id = Some(draft.id);
            }
            Err(StoreError::Conflict(_)) => {
                debug!(content_id = %content_id, "Draft created concurrently, keeping existing");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(outcome)
    }

    /// Re-enqueues every pending item. Returns how many were queued.
    pub async fn reprocess_pending(&self) -> Result<usize, WorkflowError> {
        let pending = self
            .store
            .list_content_items(Some(ContentStatus::Pending), usize::MAX)
            .await?;

        let mut queued = 0;
        for item in pending {
            let task = ClassifyContent {
                content_id: item.id,
                account_id: item.account_id,
            }
            .into_task();
            match self.dispatcher.enqueue(task).await {
                Ok(()) => queued += 1,
                Err(e) => warn!(content_id = %item.id, "Could not re-enqueue: {}", e),
            }
        }

        info!("Re-enqueued {} pending item(s)", queued);
        Ok(queued)
    }
}
