//! The single-writer loop.
//!
//! One task owns the store, the lifecycle manager and the adapter. Facade
//! commands, stream envelopes and disposal expiries are all received here and
//! handled one at a time, so entries are never shared mutably.

use crate::adapter::{AdapterStats, StreamAdapter, StreamEnvelope};
use crate::config::CacheConfig;
use crate::decode::Decode;
use crate::entry::{CacheEntry, DisposalToken, EntrySummary, QueryState};
use crate::error::CacheResult;
use crate::key::QueryKey;
use crate::lifecycle::{DisposalScheduler, LifecycleManager, SubscriptionHandle};
use crate::store::{CacheStore, Unsubscribe};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

pub(crate) enum Command<T> {
    Attach {
        key: QueryKey,
        grace: Option<Duration>,
        reply: oneshot::Sender<CacheResult<Attached<T>>>,
    },
    Detach {
        handle: SubscriptionHandle,
        observer: Unsubscribe,
    },
    Entry {
        key: QueryKey,
        reply: oneshot::Sender<Option<EntrySummary>>,
    },
    Stats {
        reply: oneshot::Sender<AdapterStats>,
    },
}

pub(crate) struct Attached<T> {
    pub handle: SubscriptionHandle,
    pub observer: Unsubscribe,
    pub state: watch::Receiver<QueryState<T>>,
}

struct Expiry {
    key: QueryKey,
    token: DisposalToken,
}

/// Disposal timers as spawned sleeps that post back onto the loop.
pub(crate) struct TokioScheduler {
    expiries: mpsc::UnboundedSender<Expiry>,
}

impl DisposalScheduler for TokioScheduler {
    type Timer = AbortHandle;

    fn schedule(&mut self, key: &QueryKey, token: DisposalToken, delay: Duration) -> AbortHandle {
        let expiries = self.expiries.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expiries.send(Expiry { key, token });
        })
        .abort_handle()
    }

    fn cancel(&mut self, timer: AbortHandle) {
        timer.abort();
    }
}

struct Runtime<D: Decode> {
    store: CacheStore<D::Item>,
    adapter: StreamAdapter<D>,
    lifecycle: LifecycleManager<TokioScheduler>,
}

/// Spawn the loop on the current tokio runtime and return its command sender.
pub(crate) fn spawn<D: Decode>(
    transport: Arc<dyn Transport>,
    decoder: D,
    config: &CacheConfig,
) -> mpsc::UnboundedSender<Command<D::Item>> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();
    let (expiries_tx, expiries_rx) = mpsc::unbounded_channel();

    let runtime = Runtime {
        store: CacheStore::new(),
        adapter: StreamAdapter::new(transport, decoder, signals_tx),
        lifecycle: LifecycleManager::new(
            TokioScheduler {
                expiries: expiries_tx,
            },
            config.keep_unused_data_for,
        ),
    };
    tokio::spawn(runtime.run(commands_rx, signals_rx, expiries_rx));
    commands_tx
}

impl<D: Decode> Runtime<D> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<D::Item>>,
        mut signals: mpsc::UnboundedReceiver<StreamEnvelope>,
        mut expiries: mpsc::UnboundedReceiver<Expiry>,
    ) {
        info!(
            grace_ms = self.lifecycle.default_grace().as_millis() as u64,
            "Query runtime started"
        );
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(envelope) = signals.recv() => {
                    self.adapter.dispatch(&mut self.store, envelope);
                }
                Some(expiry) = expiries.recv() => {
                    if self.lifecycle.expire(&mut self.store, &mut self.adapter, &expiry.key, expiry.token) {
                        debug!(key = %expiry.key, "Disposed idle entry");
                    }
                }
            }
        }
        self.adapter.close_all();
        info!(entries = self.store.len(), "Query runtime stopped");
    }

    fn handle(&mut self, command: Command<D::Item>) {
        match command {
            Command::Attach { key, grace, reply } => {
                let result = self.attach(&key, grace);
                if let Err(err) = &result {
                    error!(key = %key, error = %err, "Attach failed");
                }
                // Caller gave up before the reply: release what was registered.
                if let Err(Ok(orphan)) = reply.send(result) {
                    self.detach(orphan.handle, orphan.observer);
                }
            }
            Command::Detach { handle, observer } => self.detach(handle, observer),
            Command::Entry { key, reply } => {
                let _ = reply.send(self.store.get(&key).map(CacheEntry::summary));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.adapter.stats());
            }
        }
    }

    fn attach(&mut self, key: &QueryKey, grace: Option<Duration>) -> CacheResult<Attached<D::Item>> {
        let handle = self
            .lifecycle
            .attach(&mut self.store, &mut self.adapter, key, grace)?;
        let initial = self
            .store
            .get(key)
            .map(CacheEntry::state)
            .unwrap_or_else(QueryState::uninitialized);
        let (tx, rx) = watch::channel(initial);
        let observer = self.store.subscribe(
            key,
            Box::new(move |state: &QueryState<D::Item>| {
                tx.send_replace(state.clone());
            }),
        );
        Ok(Attached {
            handle,
            observer,
            state: rx,
        })
    }

    fn detach(&mut self, handle: SubscriptionHandle, observer: Unsubscribe) {
        self.store.unsubscribe(observer);
        if let Err(err) = self.lifecycle.detach(&mut self.store, handle) {
            error!(error = %err, "Detach failed");
        }
    }
}
