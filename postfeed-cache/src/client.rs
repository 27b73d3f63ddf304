//! Query Facade.
//!
//! [`QueryClient`] is the composition-root handle: build it once in `main`
//! and clone it into whatever needs data. [`QueryClient::use_query`]
//! registers a subscriber and hands back a [`QuerySubscription`]; dropping
//! the subscription detaches it, the way unmounting a component would.

use crate::adapter::AdapterStats;
use crate::config::CacheConfig;
use crate::decode::Decode;
use crate::entry::{EntryId, EntrySummary, QueryState};
use crate::error::{CacheError, CacheResult};
use crate::key::QueryKey;
use crate::lifecycle::SubscriptionHandle;
use crate::runtime::{self, Command};
use crate::store::Unsubscribe;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Per-subscription options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Do not attach. No entry is created and the state stays `Uninitialized`.
    pub skip: bool,
    /// Overrides the client's grace period when this subscription is the last
    /// one to leave.
    pub keep_unused_data_for: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_keep_unused_data_for(mut self, grace: Duration) -> Self {
        self.keep_unused_data_for = Some(grace);
        self
    }
}

pub struct QueryClient<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Clone for QueryClient<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<T> QueryClient<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start the cache runtime on the current tokio runtime.
    pub fn new<D>(transport: Arc<dyn Transport>, decoder: D, config: CacheConfig) -> Self
    where
        D: Decode<Item = T>,
    {
        Self {
            commands: runtime::spawn(transport, decoder, &config),
        }
    }

    /// Register interest in `key` and observe its state.
    pub async fn use_query(
        &self,
        key: impl Into<QueryKey>,
        options: QueryOptions,
    ) -> CacheResult<QuerySubscription<T>> {
        let key = key.into();
        if options.skip {
            let (_, state) = watch::channel(QueryState::uninitialized());
            return Ok(QuerySubscription {
                key,
                state,
                live: None,
            });
        }

        let (reply, response) = oneshot::channel();
        self.send(Command::Attach {
            key: key.clone(),
            grace: options.keep_unused_data_for,
            reply,
        })?;
        let attached = response.await.map_err(|_| CacheError::Shutdown)??;

        Ok(QuerySubscription {
            key,
            state: attached.state,
            live: Some(Live {
                handle: attached.handle,
                observer: attached.observer,
                commands: self.commands.clone(),
            }),
        })
    }

    /// Snapshot of the entry at `key`, if one exists.
    pub async fn entry(&self, key: impl Into<QueryKey>) -> CacheResult<Option<EntrySummary>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Entry {
            key: key.into(),
            reply,
        })?;
        response.await.map_err(|_| CacheError::Shutdown)
    }

    /// Connection counters.
    pub async fn stats(&self) -> CacheResult<AdapterStats> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        response.await.map_err(|_| CacheError::Shutdown)
    }

    fn send(&self, command: Command<T>) -> CacheResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CacheError::Shutdown)
    }
}

struct Live<T> {
    handle: SubscriptionHandle,
    observer: Unsubscribe,
    commands: mpsc::UnboundedSender<Command<T>>,
}

/// One registered consumer of a query.
pub struct QuerySubscription<T> {
    key: QueryKey,
    state: watch::Receiver<QueryState<T>>,
    live: Option<Live<T>>,
}

impl<T> QuerySubscription<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_skipped(&self) -> bool {
        self.live.is_none()
    }

    /// Entry instance this subscription is attached to.
    pub fn entry(&self) -> Option<EntryId> {
        self.live.as_ref().map(|live| live.handle.entry())
    }

    /// Latest state; marks it as seen.
    pub fn current(&mut self) -> QueryState<T>
    where
        T: Clone,
    {
        self.state.borrow_and_update().clone()
    }

    /// Wait for the next change. Returns `false` once no further changes can
    /// arrive (skipped query, or the entry and runtime are gone).
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> CacheResult<QueryState<T>>
    where
        T: Clone,
        F: FnMut(&QueryState<T>) -> bool,
    {
        loop {
            {
                let state = self.state.borrow_and_update();
                if predicate(&state) {
                    return Ok(state.clone());
                }
            }
            if self.state.changed().await.is_err() {
                return Err(CacheError::Shutdown);
            }
        }
    }

    /// Detach now. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(live) = self.live.take() {
            let _ = live.commands.send(Command::Detach {
                handle: live.handle,
                observer: live.observer,
            });
        }
    }
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .field("entry", &self.entry())
            .finish()
    }
}
