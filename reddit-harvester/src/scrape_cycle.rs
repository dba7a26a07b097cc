use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use interfaces::defs::{AccountId, ClassifyContent, CyclePhase, ProgressEvent, ProgressSink, TaskDispatcher};
use interfaces::state::Store;
use session_vault::SessionManager;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::automation::{ensure_session, AccountAutomation, AdapterCache};
use crate::registry::{AccountRegistry, Cancellable};
use crate::types::{CycleConfig, CycleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStatus {
    pub active: bool,
    pub phase: Option<CyclePhase>,
    pub items_found: usize,
    pub time_remaining: Duration,
}

impl CycleStatus {
    fn idle() -> Self {
        Self {
            active: false,
            phase: None,
            items_found: 0,
            time_remaining: Duration::ZERO,
        }
    }
}

struct CycleState {
    phase: CyclePhase,
    items_found: usize,
    phase_deadline: Instant,
}

/// Registered before the session is ready; `task` stays empty until then.
struct CycleHandle {
    cancelled: Arc<AtomicBool>,
    state: Arc<RwLock<CycleState>>,
    task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

fn task_slot(slot: &StdMutex<Option<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Cancellable for CycleHandle {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = task_slot(&self.task).take() {
            task.abort();
        }
    }
}

/// Everything one account's loop needs, owned by the spawned task.
struct CycleRunner {
    account_id: AccountId,
    automation: Arc<dyn AccountAutomation>,
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn TaskDispatcher>,
    progress: Arc<dyn ProgressSink>,
    config: CycleConfig,
    cancelled: Arc<AtomicBool>,
    state: Arc<RwLock<CycleState>>,
}

impl CycleRunner {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn run(self) {
        loop {
            let window_start = Instant::now();
            let window_end = window_start + self.config.harvest_window;
            {
                let mut state = self.state.write().await;
                state.phase = CyclePhase::Scraping;
                state.items_found = 0;
                state.phase_deadline = window_end;
            }

            let mut next_tick = window_start;
            while next_tick < window_end {
                sleep_until(next_tick).await;
                if self.is_cancelled() {
                    return;
                }
                self.tick(window_end).await;
                next_tick += self.config.tick_interval;
            }

            sleep_until(window_end).await;
            if self.is_cancelled() {
                return;
            }

            let cooldown_end = window_end + self.config.cooldown;
            let items_found = {
                let mut state = self.state.write().await;
                state.phase = CyclePhase::Break;
                state.phase_deadline = cooldown_end;
                state.items_found
            };
            info!(account_id = %self.account_id, "Harvest window over with {} new item(s), cooling down", items_found);
            self.progress.publish(ProgressEvent {
                account_id: self.account_id,
                status: CyclePhase::Break,
                items_found,
                time_remaining_ms: self.config.cooldown.as_millis() as u64,
            });

            sleep_until(cooldown_end).await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// One fetch-and-ingest pass. Failures are logged; the next tick retries.
    async fn tick(&self, window_end: Instant) {
        match self
            .automation
            .fetch_recent_items(&self.config.channel, self.config.fetch_limit, self.config.recency_window)
            .await
        {
            Ok(items) => {
                for item in items {
                    if self.is_cancelled() {
                        return;
                    }
                    self.ingest(item).await;
                }
            }
            Err(e) => warn!(account_id = %self.account_id, "Harvest tick failed: {}", e),
        }

        if self.is_cancelled() {
            return;
        }
        let items_found = self.state.read().await.items_found;
        self.progress.publish(ProgressEvent {
            account_id: self.account_id,
            status: CyclePhase::Scraping,
            items_found,
            time_remaining_ms: window_end.saturating_duration_since(Instant::now()).as_millis() as u64,
        });
    }

    async fn ingest(&self, item: crate::types::HarvestedItem) {
        let external_id = item.external_id.clone();

        match self.store.content_exists(&external_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(external_id = %external_id, "Dedup check failed: {}", e);
                return;
            }
        }

        // The store's unique external id is the real guard; a racing insert yields None.
        let stored = match self.store.insert_content_item(item.into_new_content(self.account_id)).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!(external_id = %external_id, "Could not store item: {}", e);
                return;
            }
        };

        self.state.write().await.items_found += 1;
        debug!(account_id = %self.account_id, content_id = %stored.id, "Ingested {}", external_id);

        let task = ClassifyContent {
            content_id: stored.id,
            account_id: self.account_id,
        }
        .into_task();
        if let Err(e) = self.dispatcher.enqueue(task).await {
            warn!(content_id = %stored.id, "Could not enqueue classification: {}", e);
        }
    }
}

/// Runs one harvest/cooldown loop per account.
pub struct ScrapeCycleEngine {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    adapters: Arc<AdapterCache>,
    dispatcher: Arc<dyn TaskDispatcher>,
    progress: Arc<dyn ProgressSink>,
    config: CycleConfig,
    cycles: AccountRegistry<CycleHandle>,
}

impl ScrapeCycleEngine {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        adapters: Arc<AdapterCache>,
        dispatcher: Arc<dyn TaskDispatcher>,
        progress: Arc<dyn ProgressSink>,
        config: CycleConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            adapters,
            dispatcher,
            progress,
            config,
            cycles: AccountRegistry::new(),
        }
    }

    /// Starts harvesting for the account, replacing any running cycle.
    ///
    /// Fails without leaving a cycle behind when the account is missing,
    /// inactive, publish-only, or cannot authenticate. A `stop` (or another
    /// `start`) for the account while the session is being set up wins, and
    /// this call returns `CycleError::Cancelled`.
    pub async fn start(&self, account_id: AccountId) -> Result<(), CycleError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(CycleError::AccountNotFound(account_id))?;
        if !account.is_active() {
            return Err(CycleError::AccountInactive(account_id));
        }
        if !account.mode.can_harvest() {
            return Err(CycleError::HarvestingNotAllowed(account_id));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Arc::new(RwLock::new(CycleState {
            phase: CyclePhase::Scraping,
            items_found: 0,
            phase_deadline: Instant::now() + self.config.harvest_window,
        }));
        let task = Arc::new(StdMutex::new(None));
        self.cycles
            .replace(
                account_id,
                CycleHandle {
                    cancelled: cancelled.clone(),
                    state: state.clone(),
                    task: task.clone(),
                },
            )
            .await;

        let automation = self.adapters.resolve(&account).await;
        let source =
            match ensure_session(automation.as_ref(), &self.sessions, &account, self.config.session_ttl_hours).await {
                Ok(source) => source,
                Err(e) => {
                    self.cycles
                        .remove_if(account_id, |h| Arc::ptr_eq(&h.cancelled, &cancelled))
                        .await;
                    return Err(CycleError::Authentication(e));
                }
            };
        debug!(account_id = %account_id, "Session ready ({:?})", source);

        let runner = CycleRunner {
            account_id,
            automation,
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            progress: self.progress.clone(),
            config: self.config.clone(),
            cancelled: cancelled.clone(),
            state,
        };

        {
            // Cancel sets the flag before taking the slot, so either it sees
            // the task here or we see the flag.
            let mut slot = task_slot(&task);
            if cancelled.load(Ordering::SeqCst) {
                info!(account_id = %account_id, "Scrape cycle stopped before it began");
                return Err(CycleError::Cancelled(account_id));
            }
            *slot = Some(tokio::spawn(runner.run()));
        }

        if let Err(e) = self.store.touch_account(account_id, Utc::now()).await {
            warn!(account_id = %account_id, "Could not stamp last activity: {}", e);
        }
        info!(account_id = %account_id, "Scrape cycle started");
        Ok(())
    }

    /// Cancels the account's cycle. Returns whether one was running.
    pub async fn stop(&self, account_id: AccountId) -> bool {
        let stopped = self.cycles.cancel(account_id).await;
        if stopped {
            info!(account_id = %account_id, "Scrape cycle stopped");
        }
        stopped
    }

    pub async fn stop_all(&self) -> usize {
        let stopped = self.cycles.cancel_all().await;
        info!("Stopped {} scrape cycle(s)", stopped);
        stopped
    }

    pub async fn status(&self, account_id: AccountId) -> CycleStatus {
        let Some(state) = self.cycles.with(account_id, |h| h.state.clone()).await else {
            return CycleStatus::idle();
        };
        let state = state.read().await;
        CycleStatus {
            active: true,
            phase: Some(state.phase),
            items_found: state.items_found,
            time_remaining: state.phase_deadline.saturating_duration_since(Instant::now()),
        }
    }

    pub async fn active_accounts(&self) -> Vec<AccountId> {
        self.cycles.account_ids().await
    }
}
