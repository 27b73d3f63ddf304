//! Subscription Lifecycle Manager.
//!
//! Counts subscribers per key, opens the connection when an entry gains its
//! first subscriber, and schedules disposal when the count drops to zero.
//! Disposal goes through a [`DisposalScheduler`] even for a zero grace period,
//! so a detach immediately followed by an attach (a refresh, a re-render)
//! reuses the entry and its connection.

use crate::adapter::StreamAdapter;
use crate::decode::Decode;
use crate::entry::{DisposalToken, EntryId};
use crate::error::{CacheError, CacheResult};
use crate::key::QueryKey;
use crate::store::CacheStore;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Timer seam for disposals.
///
/// When a scheduled timer fires, the owner must call
/// [`LifecycleManager::expire`] with the same key and token.
pub trait DisposalScheduler: Send {
    type Timer: Send;

    fn schedule(&mut self, key: &QueryKey, token: DisposalToken, delay: Duration) -> Self::Timer;

    fn cancel(&mut self, timer: Self::Timer);
}

/// One registered subscriber. Not `Clone`: detaching consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    key: QueryKey,
    entry: EntryId,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Entry instance the subscriber was attached to.
    pub fn entry(&self) -> EntryId {
        self.entry
    }
}

struct Attachment {
    key: QueryKey,
    grace: Option<Duration>,
}

pub struct LifecycleManager<S: DisposalScheduler> {
    scheduler: S,
    default_grace: Duration,
    attachments: HashMap<u64, Attachment>,
    pending: HashMap<QueryKey, (DisposalToken, S::Timer)>,
    next_handle: u64,
    next_token: u64,
}

impl<S: DisposalScheduler> LifecycleManager<S> {
    pub fn new(scheduler: S, default_grace: Duration) -> Self {
        Self {
            scheduler,
            default_grace,
            attachments: HashMap::new(),
            pending: HashMap::new(),
            next_handle: 1,
            next_token: 1,
        }
    }

    pub fn default_grace(&self) -> Duration {
        self.default_grace
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Number of live handles across all keys.
    pub fn attached(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_disposal_pending(&self, key: &QueryKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Register one subscriber for `key`.
    ///
    /// `grace` overrides the default grace period when this subscriber is the
    /// one that brings the count back to zero.
    pub fn attach<D: Decode>(
        &mut self,
        store: &mut CacheStore<D::Item>,
        adapter: &mut StreamAdapter<D>,
        key: &QueryKey,
        grace: Option<Duration>,
    ) -> CacheResult<SubscriptionHandle> {
        if let Some((_, timer)) = self.pending.remove(key) {
            self.scheduler.cancel(timer);
            store.set_disposal(key, None);
            debug!(key = %key, "Cancelled pending disposal on re-attach");
        }

        let entry = store.get_or_create(key).instance();
        if !adapter.is_open(key) {
            adapter.open(key)?;
        }
        let count = store.retain(key)?;

        let id = self.next_handle;
        self.next_handle += 1;
        self.attachments.insert(
            id,
            Attachment {
                key: key.clone(),
                grace,
            },
        );
        debug!(key = %key, handle = id, subscribers = count, "Attached subscriber");

        Ok(SubscriptionHandle {
            id,
            key: key.clone(),
            entry,
        })
    }

    /// Drop one subscriber. Returns the remaining subscriber count.
    pub fn detach<T: Clone>(
        &mut self,
        store: &mut CacheStore<T>,
        handle: SubscriptionHandle,
    ) -> CacheResult<usize> {
        let attachment = self.attachments.remove(&handle.id).ok_or_else(|| {
            CacheError::violation(format!("detach of unknown handle {}", handle.id))
        })?;
        let key = attachment.key;
        let remaining = store.release(&key)?;
        debug!(key = %key, handle = handle.id, subscribers = remaining, "Detached subscriber");

        if remaining == 0 {
            let delay = attachment.grace.unwrap_or(self.default_grace);
            let token = DisposalToken(self.next_token);
            self.next_token += 1;
            let timer = self.scheduler.schedule(&key, token, delay);
            if let Some((_, previous)) = self.pending.insert(key.clone(), (token, timer)) {
                self.scheduler.cancel(previous);
            }
            store.set_disposal(&key, Some(token));
            debug!(key = %key, delay_ms = delay.as_millis() as u64, "Scheduled disposal");
        }
        Ok(remaining)
    }

    /// Timer callback. Closes the connection and evicts the entry if `token`
    /// is still the pending disposal for `key` and nobody re-attached.
    pub fn expire<D: Decode>(
        &mut self,
        store: &mut CacheStore<D::Item>,
        adapter: &mut StreamAdapter<D>,
        key: &QueryKey,
        token: DisposalToken,
    ) -> bool {
        match self.pending.get(key) {
            Some((current, _)) if *current == token => {}
            _ => {
                debug!(key = %key, "Ignoring stale disposal");
                return false;
            }
        }
        self.pending.remove(key);

        let idle = store
            .get(key)
            .is_some_and(|entry| entry.subscriber_count() == 0);
        if !idle {
            store.set_disposal(key, None);
            return false;
        }

        adapter.close(key);
        store.evict(key);
        true
    }
}

/// A disposal recorded by [`ManualScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledDisposal {
    pub key: QueryKey,
    pub token: DisposalToken,
    pub delay: Duration,
}

/// Scheduler for a caller-driven clock: disposals are only recorded, and the
/// caller decides when they are due.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    scheduled: Vec<ScheduledDisposal>,
    cancelled: usize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> &[ScheduledDisposal] {
        &self.scheduled
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Take every disposal that is still scheduled.
    pub fn drain(&mut self) -> Vec<ScheduledDisposal> {
        std::mem::take(&mut self.scheduled)
    }
}

impl DisposalScheduler for ManualScheduler {
    type Timer = DisposalToken;

    fn schedule(&mut self, key: &QueryKey, token: DisposalToken, delay: Duration) -> DisposalToken {
        self.scheduled.push(ScheduledDisposal {
            key: key.clone(),
            token,
            delay,
        });
        token
    }

    fn cancel(&mut self, timer: DisposalToken) {
        let before = self.scheduled.len();
        self.scheduled.retain(|scheduled| scheduled.token != timer);
        if self.scheduled.len() != before {
            self.cancelled += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StreamEnvelope;
    use crate::decode::TextDecoder;
    use crate::entry::QueryStatus;
    use crate::transport::MemoryTransport;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        store: CacheStore<String>,
        adapter: StreamAdapter<TextDecoder>,
        manager: LifecycleManager<ManualScheduler>,
        _signals: mpsc::UnboundedReceiver<StreamEnvelope>,
    }

    impl Harness {
        fn new(grace: Duration) -> Self {
            let transport = MemoryTransport::new();
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                adapter: StreamAdapter::new(Arc::new(transport), TextDecoder, tx),
                store: CacheStore::new(),
                manager: LifecycleManager::new(ManualScheduler::new(), grace),
                _signals: rx,
            }
        }

        fn attach(&mut self, key: &QueryKey) -> SubscriptionHandle {
            self.manager
                .attach(&mut self.store, &mut self.adapter, key, None)
                .unwrap()
        }

        fn detach(&mut self, handle: SubscriptionHandle) -> usize {
            self.manager.detach(&mut self.store, handle).unwrap()
        }

        fn fire_all(&mut self) -> usize {
            let due = self.manager.scheduler_mut().drain();
            due.into_iter()
                .filter(|d| {
                    self.manager
                        .expire(&mut self.store, &mut self.adapter, &d.key, d.token)
                })
                .count()
        }
    }

    fn posts() -> QueryKey {
        QueryKey::new("posts")
    }

    #[tokio::test]
    async fn first_attach_creates_entry_and_opens_connection() {
        let mut h = Harness::new(Duration::ZERO);
        let handle = h.attach(&posts());

        let entry = h.store.get(&posts()).unwrap();
        assert_eq!(entry.status(), QueryStatus::Loading);
        assert_eq!(entry.subscriber_count(), 1);
        assert_eq!(handle.entry(), entry.instance());
        assert!(h.adapter.is_open(&posts()));
        assert_eq!(h.adapter.stats().opened, 1);
    }

    #[tokio::test]
    async fn two_subscribers_share_one_connection() {
        let mut h = Harness::new(Duration::ZERO);
        let first = h.attach(&posts());
        let second = h.attach(&posts());
        assert_eq!(h.store.get(&posts()).unwrap().subscriber_count(), 2);
        assert_eq!(h.adapter.stats().opened, 1);

        assert_eq!(h.detach(first), 1);
        assert!(h.manager.scheduler().scheduled().is_empty());
        assert_eq!(h.detach(second), 0);
        assert_eq!(h.fire_all(), 1);

        assert!(!h.store.contains(&posts()));
        let stats = h.adapter.stats();
        assert_eq!((stats.opened, stats.closed), (1, 1));
    }

    #[tokio::test]
    async fn reattach_before_expiry_reuses_entry_and_connection() {
        let mut h = Harness::new(Duration::ZERO);
        let handle = h.attach(&posts());
        let instance = handle.entry();
        h.detach(handle);
        assert!(h.store.get(&posts()).unwrap().disposal_pending());
        assert!(h.manager.is_disposal_pending(&posts()));

        let handle = h.attach(&posts());
        assert_eq!(handle.entry(), instance);
        assert!(!h.store.get(&posts()).unwrap().disposal_pending());
        assert_eq!(h.manager.scheduler().cancelled(), 1);
        assert_eq!(h.fire_all(), 0);
        let stats = h.adapter.stats();
        assert_eq!((stats.opened, stats.closed), (1, 0));
    }

    #[tokio::test]
    async fn stale_token_does_not_evict() {
        let mut h = Harness::new(Duration::ZERO);
        let handle = h.attach(&posts());
        h.detach(handle);
        let stale = h.manager.scheduler().scheduled()[0].clone();
        let handle = h.attach(&posts());
        h.detach(handle);

        assert!(!h
            .manager
            .expire(&mut h.store, &mut h.adapter, &stale.key, stale.token));
        assert!(h.store.contains(&posts()));
        assert_eq!(h.fire_all(), 1);
        assert!(!h.store.contains(&posts()));
    }

    #[tokio::test]
    async fn eviction_then_attach_starts_a_new_instance() {
        let mut h = Harness::new(Duration::ZERO);
        let handle = h.attach(&posts());
        let first = handle.entry();
        h.detach(handle);
        h.fire_all();

        let handle = h.attach(&posts());
        assert_ne!(handle.entry(), first);
        assert_eq!(h.adapter.stats().opened, 2);
    }

    #[tokio::test]
    async fn grace_override_wins_over_default() {
        let mut h = Harness::new(Duration::from_secs(60));
        let handle = h
            .manager
            .attach(
                &mut h.store,
                &mut h.adapter,
                &posts(),
                Some(Duration::from_millis(5)),
            )
            .unwrap();
        h.detach(handle);
        assert_eq!(
            h.manager.scheduler().scheduled()[0].delay,
            Duration::from_millis(5)
        );

        let handle = h.attach(&posts());
        h.detach(handle);
        assert_eq!(
            h.manager.scheduler().scheduled()[0].delay,
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn detach_of_unknown_handle_is_a_contract_violation() {
        let mut h = Harness::new(Duration::ZERO);
        let handle = h.attach(&posts());
        let forged = SubscriptionHandle {
            id: handle.id + 100,
            key: posts(),
            entry: handle.entry(),
        };
        assert!(matches!(
            h.manager.detach(&mut h.store, forged),
            Err(CacheError::ContractViolation(_))
        ));
        assert_eq!(h.store.get(&posts()).unwrap().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribed_keys_have_no_entry() {
        let mut h = Harness::new(Duration::ZERO);
        h.attach(&posts());
        assert!(!h.store.contains(&QueryKey::new("comments")));
        assert_eq!(h.store.len(), 1);
    }
}
