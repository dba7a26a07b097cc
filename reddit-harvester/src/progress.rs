use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use interfaces::defs::{AccountId, ProgressEvent, ProgressSink};
use tokio::sync::mpsc;
use tracing::debug;

pub type SubscriptionId = u64;

struct Subscriber {
    account: Option<AccountId>,
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

/// Fan-out of scrape progress to explicit subscribers, one channel each.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Clone, Default)]
pub struct ProgressHub {
    subscribers: Arc<Mutex<HashMap<SubscriptionId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one account's events, or to every account's with `None`.
    pub fn subscribe(&self, account: Option<AccountId>) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, Subscriber { account, sender });
        }
        debug!("Progress subscriber {} added", id);
        Subscription { id, events }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl ProgressSink for ProgressHub {
    fn publish(&self, event: ProgressEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|id, subscriber| {
            if subscriber.account.is_some_and(|a| a != event.account_id) {
                return true;
            }
            let delivered = subscriber.sender.send(event.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed progress subscriber {}", id);
            }
            delivered
        });
    }
}
