mod common;

use std::sync::Arc;
use std::time::Duration;

use interfaces::defs::{AccountMode, AccountStatus, ClassifyContent, CyclePhase, Task};
use interfaces::Store;
use reddit_harvester::types::{CycleConfig, CycleError};
use reddit_harvester::{ChannelDispatcher, ProgressHub, ScrapeCycleEngine};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use common::*;

fn cycle_config() -> CycleConfig {
    CycleConfig {
        tick_interval: Duration::from_secs(10),
        harvest_window: Duration::from_secs(60),
        cooldown: Duration::from_secs(30),
        recency_window: Duration::from_secs(30 * 60),
        fetch_limit: 25,
        channel: "all".to_string(),
        session_ttl_hours: 24,
    }
}

struct Cycles {
    harness: Harness,
    engine: ScrapeCycleEngine,
    progress: ProgressHub,
    tasks: UnboundedReceiver<Task>,
}

fn cycles() -> Cycles {
    let harness = Harness::new();
    let (dispatcher, tasks) = ChannelDispatcher::new();
    let progress = ProgressHub::new();
    let engine = ScrapeCycleEngine::new(
        harness.store.clone(),
        harness.sessions.clone(),
        harness.adapters.clone(),
        Arc::new(dispatcher),
        Arc::new(progress.clone()),
        cycle_config(),
    );
    Cycles {
        harness,
        engine,
        progress,
        tasks,
    }
}

fn drain(tasks: &mut UnboundedReceiver<Task>) -> Vec<ClassifyContent> {
    let mut drained = Vec::new();
    while let Ok(task) = tasks.try_recv() {
        drained.push(ClassifyContent::from_task(&task).unwrap());
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn repeated_items_are_stored_and_enqueued_once() {
    let mut c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;
    c.harness.automation.set_items(vec![
        harvested("p1", "Can you rate my room?"),
        harvested("p2", "Looking for feedback"),
    ]);

    c.engine.start(account.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert!(c.harness.automation.fetches() >= 3);
    let stored = c.harness.store.list_content_items(None, 100).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|item| item.account_id == account.id));

    let queued = drain(&mut c.tasks);
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|t| t.account_id == account.id));

    let status = c.engine.status(account.id).await;
    assert!(status.active);
    assert_eq!(status.phase, Some(CyclePhase::Scraping));
    assert_eq!(status.items_found, 2);

    c.engine.stop(account.id).await;
}

#[tokio::test(start_paused = true)]
async fn window_ends_with_a_break_event() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Both).await;
    c.harness.automation.set_items(vec![harvested("p1", "Rate me?")]);
    let mut subscription = c.progress.subscribe(Some(account.id));

    c.engine.start(account.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(65)).await;

    let mut events = Vec::new();
    while let Ok(event) = subscription.events.try_recv() {
        events.push(event);
    }
    assert!(events.iter().any(|e| e.status == CyclePhase::Scraping));
    let pause = events
        .iter()
        .find(|e| e.status == CyclePhase::Break)
        .expect("break event published");
    assert_eq!(pause.items_found, 1);
    assert_eq!(pause.time_remaining_ms, 30_000);

    let status = c.engine.status(account.id).await;
    assert_eq!(status.phase, Some(CyclePhase::Break));
    assert!(status.time_remaining <= Duration::from_secs(30));

    c.engine.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn cooldown_is_followed_by_a_fresh_window() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;

    c.engine.start(account.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(95)).await;

    let status = c.engine.status(account.id).await;
    assert_eq!(status.phase, Some(CyclePhase::Scraping));
    assert_eq!(status.items_found, 0);
    assert!(c.harness.automation.fetches() >= 7);

    c.engine.stop(account.id).await;
}

#[tokio::test(start_paused = true)]
async fn stopped_cycle_does_no_more_work() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;

    c.engine.start(account.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert!(c.engine.stop(account.id).await);
    assert!(!c.engine.stop(account.id).await);

    let fetches = c.harness.automation.fetches();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(c.harness.automation.fetches(), fetches);

    let status = c.engine.status(account.id).await;
    assert!(!status.active);
    assert_eq!(status.phase, None);
}

#[tokio::test(start_paused = true)]
async fn restarting_replaces_the_running_cycle() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;

    c.engine.start(account.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    c.engine.start(account.id).await.unwrap();

    assert_eq!(c.engine.active_accounts().await, vec![account.id]);
    // The second start reuses the session the first one established.
    assert_eq!(c.harness.automation.logins(), 1);
    assert_eq!(c.harness.factory.created.load(std::sync::atomic::Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = c.harness.automation.fetches();
    tokio::time::sleep(Duration::from_secs(10)).await;
    // One loop ticks every 10s; two loops would double the count.
    assert_eq!(c.harness.automation.fetches() - before, 1);

    assert_eq!(c.engine.stop_all().await, 1);
}

#[tokio::test(start_paused = true)]
async fn start_records_activity_and_stores_the_session() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;
    assert!(account.last_active_at.is_none());

    c.engine.start(account.id).await.unwrap();

    let refreshed = c.harness.store.get_account(account.id).await.unwrap().unwrap();
    assert!(refreshed.last_active_at.is_some());
    let stored = c.harness.sessions.get_valid_session(account.id).await.unwrap();
    assert_eq!(stored, Some(session_token()));

    c.engine.stop(account.id).await;
}

#[tokio::test(start_paused = true)]
async fn ineligible_accounts_are_refused() {
    let c = cycles();

    let missing = Uuid::new_v4();
    assert!(matches!(
        c.engine.start(missing).await,
        Err(CycleError::AccountNotFound(id)) if id == missing
    ));

    let poster = c.harness.account("poster", AccountMode::Post).await;
    assert!(matches!(
        c.engine.start(poster.id).await,
        Err(CycleError::HarvestingNotAllowed(_))
    ));

    let idle = c.harness.account("idle", AccountMode::Scrape).await;
    c.harness
        .store
        .set_account_status(idle.id, AccountStatus::Inactive)
        .await
        .unwrap();
    assert!(matches!(c.engine.start(idle.id).await, Err(CycleError::AccountInactive(_))));

    assert!(c.engine.active_accounts().await.is_empty());
    assert_eq!(c.harness.automation.logins(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_login_leaves_no_cycle() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;
    c.harness.automation.fail_login("bad password");

    let result = c.engine.start(account.id).await;
    assert!(matches!(result, Err(CycleError::Authentication(_))));
    assert!(!c.engine.status(account.id).await.active);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(c.harness.automation.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_login_keeps_the_cycle_from_starting() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;
    c.harness.automation.delay_login(Duration::from_secs(5));
    c.harness.automation.set_items(vec![harvested("p1", "Can you rate my room?")]);

    let (started, stopped) = tokio::join!(c.engine.start(account.id), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        c.engine.stop(account.id).await
    });

    assert!(stopped);
    assert!(matches!(started, Err(CycleError::Cancelled(id)) if id == account.id));
    assert_eq!(c.harness.automation.logins(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(c.harness.automation.fetches(), 0);
    assert!(!c.engine.status(account.id).await.active);
    assert!(c.engine.active_accounts().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_start_during_login_supersedes_the_first() {
    let c = cycles();
    let account = c.harness.account("harvester", AccountMode::Scrape).await;
    c.harness.automation.delay_login(Duration::from_secs(5));

    let (first, second) = tokio::join!(c.engine.start(account.id), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        c.engine.start(account.id).await
    });

    assert!(matches!(first, Err(CycleError::Cancelled(_))));
    assert!(second.is_ok());
    assert_eq!(c.engine.active_accounts().await, vec![account.id]);

    c.engine.stop(account.id).await;
    let fetches = c.harness.automation.fetches();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(c.harness.automation.fetches(), fetches);
}
