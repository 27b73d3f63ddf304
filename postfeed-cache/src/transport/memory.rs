//! In-process transport driven by the caller.
//!
//! Each `connect` opens a fresh channel for the key. The handle side can then
//! publish payloads, inject a failure or hang up, and count how many times a
//! key was connected.

use super::{Transport, TransportStream};
use crate::error::TransportError;
use crate::key::QueryKey;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Feed = mpsc::UnboundedSender<Result<String, TransportError>>;

#[derive(Default)]
struct MemoryState {
    live: HashMap<QueryKey, Feed>,
    connects: HashMap<QueryKey, usize>,
    refused: HashSet<QueryKey>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    connected: Arc<Notify>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_feed(&self, key: &QueryKey) -> Option<Feed> {
        self.state()
            .live
            .get(key)
            .filter(|feed| !feed.is_closed())
            .cloned()
    }

    /// Deliver one payload on the live connection for `key`.
    pub fn publish(&self, key: impl Into<QueryKey>, payload: impl Into<String>) -> bool {
        let key = key.into();
        match self.live_feed(&key) {
            Some(feed) => feed.send(Ok(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Fail the live connection for `key`.
    pub fn fail(&self, key: impl Into<QueryKey>, reason: impl Into<String>) -> bool {
        let key = key.into();
        let Some(feed) = self.state().live.remove(&key) else {
            return false;
        };
        feed.send(Err(TransportError::Remote(reason.into()))).is_ok()
    }

    /// End the live stream for `key` as if the server closed it.
    pub fn hang_up(&self, key: impl Into<QueryKey>) -> bool {
        let key = key.into();
        self.state().live.remove(&key).is_some()
    }

    /// Make subsequent connects for `key` fail.
    pub fn refuse(&self, key: impl Into<QueryKey>) {
        self.state().refused.insert(key.into());
    }

    pub fn connect_count(&self, key: impl Into<QueryKey>) -> usize {
        let key = key.into();
        self.state().connects.get(&key).copied().unwrap_or(0)
    }

    /// Whether a consumer is still reading the latest connection for `key`.
    pub fn is_connected(&self, key: impl Into<QueryKey>) -> bool {
        self.live_feed(&key.into()).is_some()
    }

    /// Wait until `key` has a live connection.
    pub async fn wait_connected(&self, key: impl Into<QueryKey>) {
        let key = key.into();
        loop {
            let notified = self.connected.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live_feed(&key).is_some() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, key: &QueryKey) -> Result<TransportStream, TransportError> {
        let rx = {
            let mut state = self.state();
            *state.connects.entry(key.clone()).or_default() += 1;
            if state.refused.contains(key) {
                return Err(TransportError::Refused(format!("{key} is refused")));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.live.insert(key.clone(), tx);
            rx
        };
        self.connected.notify_waiters();
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
