//! Stream Connection Adapter.
//!
//! Owns at most one connection per key. Each connection is a spawned pump
//! task that reads the transport stream and posts [`StreamEnvelope`]s back to
//! the runtime loop; [`StreamAdapter::dispatch`] is the only place those
//! envelopes touch the cache.

use crate::decode::Decode;
use crate::error::{CacheError, CacheResult, TransportError};
use crate::key::QueryKey;
use crate::store::CacheStore;
use crate::transport::Transport;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of one opened connection. Envelopes carrying an id that is no
/// longer current are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Debug)]
pub enum StreamSignal {
    Opened,
    Message(String),
    Failed(TransportError),
}

#[derive(Debug)]
pub struct StreamEnvelope {
    pub key: QueryKey,
    pub connection: ConnectionId,
    pub signal: StreamSignal,
}

struct Connection {
    id: ConnectionId,
    task: JoinHandle<()>,
    delivered: u64,
    failed: bool,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub opened: u64,
    pub closed: u64,
    pub open_keys: Vec<QueryKey>,
    pub delivered: HashMap<QueryKey, u64>,
}

pub struct StreamAdapter<D: Decode> {
    transport: Arc<dyn Transport>,
    decoder: D,
    signals: mpsc::UnboundedSender<StreamEnvelope>,
    connections: HashMap<QueryKey, Connection>,
    next_connection: u64,
    opened: u64,
    closed: u64,
}

impl<D: Decode> StreamAdapter<D> {
    pub fn new(
        transport: Arc<dyn Transport>,
        decoder: D,
        signals: mpsc::UnboundedSender<StreamEnvelope>,
    ) -> Self {
        Self {
            transport,
            decoder,
            signals,
            connections: HashMap::new(),
            next_connection: 1,
            opened: 0,
            closed: 0,
        }
    }

    pub fn is_open(&self, key: &QueryKey) -> bool {
        self.connections.contains_key(key)
    }

    /// Whether the connection for `key` has hit a transport failure.
    pub fn is_failed(&self, key: &QueryKey) -> bool {
        self.connections.get(key).is_some_and(|conn| conn.failed)
    }

    pub fn delivered(&self, key: &QueryKey) -> u64 {
        self.connections.get(key).map_or(0, |conn| conn.delivered)
    }

    /// Start a connection for `key`. Must be called from within a tokio
    /// runtime. Opening a key that already has a connection is refused.
    pub fn open(&mut self, key: &QueryKey) -> CacheResult<ConnectionId> {
        if self.connections.contains_key(key) {
            error!(key = %key, "Refusing second connection for key");
            return Err(CacheError::violation(format!(
                "connection for {key} is already open"
            )));
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;

        let task = tokio::spawn(pump(
            Arc::clone(&self.transport),
            key.clone(),
            id,
            self.signals.clone(),
        ));

        self.connections.insert(
            key.clone(),
            Connection {
                id,
                task,
                delivered: 0,
                failed: false,
            },
        );
        self.opened += 1;
        info!(key = %key, connection = id.0, "Opened stream connection");
        Ok(id)
    }

    /// Release the connection for `key`. Returns whether one was open;
    /// closing an unknown key is a no-op.
    pub fn close(&mut self, key: &QueryKey) -> bool {
        let Some(conn) = self.connections.remove(key) else {
            return false;
        };
        conn.task.abort();
        self.closed += 1;
        info!(
            key = %key,
            connection = conn.id.0,
            delivered = conn.delivered,
            failed = conn.failed,
            "Closed stream connection"
        );
        true
    }

    pub fn close_all(&mut self) {
        let keys: Vec<QueryKey> = self.connections.keys().cloned().collect();
        for key in keys {
            self.close(&key);
        }
    }

    /// Route one envelope into the store.
    pub fn dispatch(&mut self, store: &mut CacheStore<D::Item>, envelope: StreamEnvelope) {
        let StreamEnvelope {
            key,
            connection,
            signal,
        } = envelope;

        let Some(conn) = self.connections.get_mut(&key) else {
            debug!(key = %key, "Dropping signal for closed connection");
            return;
        };
        if conn.id != connection || conn.failed {
            debug!(key = %key, connection = connection.0, "Dropping stale signal");
            return;
        }

        match signal {
            StreamSignal::Opened => store.mark_ready(&key),
            StreamSignal::Message(payload) => match self.decoder.decode(&payload) {
                Ok(item) => {
                    if store.append(&key, item) {
                        conn.delivered += 1;
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Skipping malformed stream event");
                }
            },
            StreamSignal::Failed(err) => {
                conn.failed = true;
                error!(key = %key, error = %err, "Stream connection failed");
                store.set_error(&key, &err);
            }
        }
    }

    pub fn stats(&self) -> AdapterStats {
        let mut open_keys: Vec<QueryKey> = self.connections.keys().cloned().collect();
        open_keys.sort();
        AdapterStats {
            opened: self.opened,
            closed: self.closed,
            open_keys,
            delivered: self
                .connections
                .iter()
                .map(|(key, conn)| (key.clone(), conn.delivered))
                .collect(),
        }
    }
}

impl<D: Decode> Drop for StreamAdapter<D> {
    fn drop(&mut self) {
        for conn in self.connections.values() {
            conn.task.abort();
        }
    }
}

async fn pump(
    transport: Arc<dyn Transport>,
    key: QueryKey,
    connection: ConnectionId,
    signals: mpsc::UnboundedSender<StreamEnvelope>,
) {
    let send = |signal: StreamSignal| {
        signals
            .send(StreamEnvelope {
                key: key.clone(),
                connection,
                signal,
            })
            .is_ok()
    };

    let mut stream = match transport.connect(&key).await {
        Ok(stream) => stream,
        Err(err) => {
            send(StreamSignal::Failed(err));
            return;
        }
    };
    if !send(StreamSignal::Opened) {
        return;
    }

    while let Some(event) = stream.next().await {
        let delivered = match event {
            Ok(payload) => send(StreamSignal::Message(payload)),
            Err(err) => {
                send(StreamSignal::Failed(err));
                return;
            }
        };
        if !delivered {
            return;
        }
    }
    send(StreamSignal::Failed(TransportError::Closed));
}
