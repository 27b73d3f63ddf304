//! Cache Store: the only writer of cache entries.
//!
//! The store is a plain owned structure. It is driven from the single runtime
//! loop, so none of its methods lock or suspend. Every status or value change
//! is pushed synchronously to the observers registered for that key.

use crate::entry::{CacheEntry, DisposalToken, EntryId, QueryState, QueryStatus};
use crate::error::{CacheError, CacheResult};
use crate::key::QueryKey;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Callback invoked with the new state after every change to an entry.
pub type Observer<T> = Box<dyn FnMut(&QueryState<T>) + Send>;

/// Registration token returned by [`CacheStore::subscribe`].
///
/// Passing it to [`CacheStore::unsubscribe`] consumes it, so an observer is
/// detached at most once.
#[must_use = "dropping the token leaves the observer registered until eviction"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Unsubscribe {
    key: QueryKey,
    id: u64,
}

impl Unsubscribe {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

pub struct CacheStore<T> {
    entries: HashMap<QueryKey, CacheEntry<T>>,
    observers: HashMap<QueryKey, Vec<(u64, Observer<T>)>>,
    next_instance: u64,
    next_observer: u64,
}

impl<T> fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("observed_keys", &self.observers.len())
            .finish()
    }
}

impl<T: Clone> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> CacheStore<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            observers: HashMap::new(),
            next_instance: 1,
            next_observer: 1,
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.keys()
    }

    /// Return the entry for `key`, creating it in `Loading` with no items and
    /// no subscribers if it does not exist.
    pub fn get_or_create(&mut self, key: &QueryKey) -> &CacheEntry<T> {
        let next_instance = &mut self.next_instance;
        self.entries.entry(key.clone()).or_insert_with(|| {
            let instance = EntryId(*next_instance);
            *next_instance += 1;
            debug!(key = %key, instance = instance.get(), "Created cache entry");
            CacheEntry::new(key.clone(), instance)
        })
    }

    /// Append one item in arrival order.
    ///
    /// Refused (and logged) when the entry is missing or not accepting items.
    /// Returns whether the item was stored.
    pub fn append(&mut self, key: &QueryKey, item: T) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            warn!(key = %key, "Dropping item for missing cache entry");
            return false;
        };
        if !entry.status.accepts_items() {
            warn!(key = %key, status = %entry.status, "Dropping item for entry not accepting items");
            return false;
        }
        entry.push(item);
        entry.status = QueryStatus::Ready;
        self.notify(key);
        true
    }

    /// Connection confirmed: `Loading -> Ready`. Other statuses are left alone.
    pub fn mark_ready(&mut self, key: &QueryKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            debug!(key = %key, "Ignoring ready signal for missing cache entry");
            return;
        };
        if entry.status == QueryStatus::Loading {
            entry.status = QueryStatus::Ready;
            self.notify(key);
        }
    }

    /// Move the entry to `Error`. Items received so far are kept.
    pub fn set_error(&mut self, key: &QueryKey, error: impl fmt::Display) {
        let Some(entry) = self.entries.get_mut(key) else {
            warn!(key = %key, error = %error, "Dropping error for missing cache entry");
            return;
        };
        entry.status = QueryStatus::Error;
        entry.error = Some(error.to_string());
        self.notify(key);
    }

    /// Remove the entry and every observer registered for its key.
    pub(crate) fn evict(&mut self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let removed = self.entries.remove(key);
        if let Some(observers) = self.observers.remove(key) {
            if !observers.is_empty() {
                warn!(key = %key, observers = observers.len(), "Evicted entry with live observers");
            }
        }
        if let Some(entry) = &removed {
            debug!(key = %key, instance = entry.instance.get(), items = entry.value.len(), "Evicted cache entry");
        }
        removed
    }

    /// Register `observer` for changes to the entry at `key`.
    pub fn subscribe(&mut self, key: &QueryKey, observer: Observer<T>) -> Unsubscribe {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers
            .entry(key.clone())
            .or_default()
            .push((id, observer));
        Unsubscribe {
            key: key.clone(),
            id,
        }
    }

    /// Detach the observer behind `token`. Returns whether it was still
    /// registered (it is gone already if its entry was evicted).
    pub fn unsubscribe(&mut self, token: Unsubscribe) -> bool {
        let Some(observers) = self.observers.get_mut(&token.key) else {
            return false;
        };
        let before = observers.len();
        observers.retain(|(id, _)| *id != token.id);
        let removed = observers.len() != before;
        if observers.is_empty() {
            self.observers.remove(&token.key);
        }
        removed
    }

    pub(crate) fn retain(&mut self, key: &QueryKey) -> CacheResult<usize> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::violation(format!("retain on missing entry {key}")))?;
        entry.subscriber_count += 1;
        Ok(entry.subscriber_count)
    }

    pub(crate) fn release(&mut self, key: &QueryKey) -> CacheResult<usize> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::violation(format!("release on missing entry {key}")))?;
        if entry.subscriber_count == 0 {
            return Err(CacheError::violation(format!(
                "release on entry {key} with no subscribers"
            )));
        }
        entry.subscriber_count -= 1;
        Ok(entry.subscriber_count)
    }

    pub(crate) fn set_disposal(&mut self, key: &QueryKey, token: Option<DisposalToken>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.disposal = token;
        }
    }

    fn notify(&mut self, key: &QueryKey) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        let Some(observers) = self.observers.get_mut(key) else {
            return;
        };
        let state = entry.state();
        for (_, observer) in observers.iter_mut() {
            observer(&state);
        }
    }
}
