use std::collections::HashMap;

use interfaces::defs::AccountId;
use tokio::sync::RwLock;
use tracing::debug;

/// Something that owns background work and can be told to stop.
pub trait Cancellable {
    fn cancel(&self);
}

/// Account-keyed map with its own synchronization. Entries for different
/// accounts never wait on each other beyond the map lock itself.
pub struct AccountRegistry<T> {
    entries: RwLock<HashMap<AccountId, T>>,
}

impl<T> AccountRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Removes the entry only while `still_current` holds for it.
    pub async fn remove_if(&self, account_id: AccountId, still_current: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.write().await;
        if entries.get(&account_id).is_some_and(still_current) {
            entries.remove(&account_id)
        } else {
            None
        }
    }

    pub async fn contains(&self, account_id: AccountId) -> bool {
        self.entries.read().await.contains_key(&account_id)
    }

    pub async fn with<R>(&self, account_id: AccountId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().await.get(&account_id).map(f)
    }

    pub async fn account_ids(&self) -> Vec<AccountId> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<T: Clone> AccountRegistry<T> {
    pub async fn get(&self, account_id: AccountId) -> Option<T> {
        self.entries.read().await.get(&account_id).cloned()
    }

    pub async fn get_or_insert_with(&self, account_id: AccountId, create: impl FnOnce() -> T) -> T {
        if let Some(existing) = self.get(account_id).await {
            return existing;
        }
        let mut entries = self.entries.write().await;
        entries.entry(account_id).or_insert_with(create).clone()
    }
}

impl<T: Cancellable> AccountRegistry<T> {
    /// Inserts `value` and cancels whatever it displaced, under one lock.
    pub async fn replace(&self, account_id: AccountId, value: T) {
        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.insert(account_id, value) {
            debug!(account_id = %account_id, "Cancelling displaced registry entry");
            previous.cancel();
        }
    }

    /// Removes and cancels the entry. Returns false when nothing was registered.
    pub async fn cancel(&self, account_id: AccountId) -> bool {
        match self.entries.write().await.remove(&account_id) {
            Some(previous) => {
                previous.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.cancel();
        }
        count
    }
}

impl<T> Default for AccountRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
