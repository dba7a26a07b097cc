use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use interfaces::defs::{CyclePhase, ProgressEvent, ProgressSink};
use reddit_harvester::{AccountRegistry, Cancellable, ProgressHub};
use uuid::Uuid;

struct Job {
    cancelled: Arc<AtomicUsize>,
}

impl Cancellable for Job {
    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

fn job(counter: &Arc<AtomicUsize>) -> Job {
    Job {
        cancelled: counter.clone(),
    }
}

#[tokio::test]
async fn replacing_an_entry_cancels_the_old_one() {
    let registry = AccountRegistry::new();
    let account = Uuid::new_v4();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    registry.replace(account, job(&first)).await;
    registry.replace(account, job(&second)).await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(registry.len().await, 1);

    assert!(registry.cancel(account).await);
    assert!(!registry.cancel(account).await);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn cancel_all_reaches_every_account() {
    let registry = AccountRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        registry.replace(Uuid::new_v4(), job(&counter)).await;
    }

    assert_eq!(registry.cancel_all().await, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(registry.account_ids().await.is_empty());
}

#[tokio::test]
async fn get_or_insert_builds_once_per_account() {
    let registry: AccountRegistry<Arc<String>> = AccountRegistry::new();
    let account = Uuid::new_v4();
    let built = AtomicUsize::new(0);

    let first = registry
        .get_or_insert_with(account, || {
            built.fetch_add(1, Ordering::SeqCst);
            Arc::new("adapter".to_string())
        })
        .await;
    let second = registry
        .get_or_insert_with(account, || {
            built.fetch_add(1, Ordering::SeqCst);
            Arc::new("other".to_string())
        })
        .await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(registry.contains(account).await);
}

#[tokio::test]
async fn remove_if_leaves_a_newer_entry_alone() {
    let registry: AccountRegistry<u32> = AccountRegistry::new();
    let account = Uuid::new_v4();
    registry.get_or_insert_with(account, || 2).await;

    assert_eq!(registry.remove_if(account, |v| *v == 1).await, None);
    assert!(registry.contains(account).await);
    assert_eq!(registry.remove_if(account, |v| *v == 2).await, Some(2));
    assert!(registry.is_empty().await);
}

fn event(account_id: Uuid, items_found: usize) -> ProgressEvent {
    ProgressEvent {
        account_id,
        status: CyclePhase::Scraping,
        items_found,
        time_remaining_ms: 1_000,
    }
}

#[tokio::test]
async fn progress_reaches_only_matching_subscribers() {
    let hub = ProgressHub::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let mut everyone = hub.subscribe(None);
    let mut only_alice = hub.subscribe(Some(alice));

    hub.publish(event(alice, 1));
    hub.publish(event(bob, 2));

    assert_eq!(everyone.events.try_recv().unwrap().account_id, alice);
    assert_eq!(everyone.events.try_recv().unwrap().account_id, bob);
    assert_eq!(only_alice.events.try_recv().unwrap().items_found, 1);
    assert!(only_alice.events.try_recv().is_err());
}

#[tokio::test]
async fn closed_subscribers_are_pruned() {
    let hub = ProgressHub::new();
    let account = Uuid::new_v4();

    let kept = hub.subscribe(None);
    let dropped = hub.subscribe(None);
    let removed = hub.subscribe(None);
    assert_eq!(hub.subscriber_count(), 3);

    assert!(hub.unsubscribe(removed.id));
    drop(dropped);
    hub.publish(event(account, 0));

    assert_eq!(hub.subscriber_count(), 1);
    drop(kept);
}

#[test]
fn progress_events_serialize_in_camel_case() {
    let value = serde_json::to_value(ProgressEvent {
        account_id: Uuid::nil(),
        status: CyclePhase::Break,
        items_found: 4,
        time_remaining_ms: 300_000,
    })
    .unwrap();
    assert_eq!(value["status"], "break");
    assert_eq!(value["itemsFound"], 4);
    assert_eq!(value["timeRemainingMs"], 300_000);
}
