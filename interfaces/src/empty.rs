use async_trait::async_trait;

use crate::defs::{CapabilityError, GenerationService, ItemContext, ProgressEvent, ProgressSink, Task, TaskDispatcher};

/// Drops every task. Useful when classification runs out of band.
pub struct DiscardingDispatcher;

#[async_trait]
impl TaskDispatcher for DiscardingDispatcher {
    async fn enqueue(&self, task: Task) -> Result<(), CapabilityError> {
        tracing::debug!("Discarding task {}", task.name);
        Ok(())
    }
}

pub struct SilentProgressSink;

impl ProgressSink for SilentProgressSink {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Generation service that is never reachable, so callers always take their fallback path.
pub struct UnavailableGenerator;

#[async_trait]
impl GenerationService for UnavailableGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _persona_prompt: &str,
        _context: &ItemContext,
    ) -> Result<String, CapabilityError> {
        Err(CapabilityError::Unavailable("no generation service configured".to_string()))
    }
}
