//! Postfeed Cache - Streaming Query Cache
//!
//! A keyed cache whose entries are filled by long-lived server push streams
//! (SSE or WebSocket) instead of one-shot requests. Consumers register
//! through [`QueryClient::use_query`]; the first subscriber for a key opens
//! the stream, the last one to leave schedules disposal, and every decoded
//! message is appended to the entry in arrival order.
//!
//! All mutation happens on one runtime task. The [`CacheStore`],
//! [`StreamAdapter`] and [`LifecycleManager`] are public so they can be
//! driven directly (with a [`ManualScheduler`]) where a tokio loop is not
//! wanted.

pub mod adapter;
pub mod client;
pub mod config;
pub mod decode;
pub mod entry;
pub mod error;
pub mod key;
pub mod lifecycle;
mod runtime;
pub mod store;
pub mod transport;

pub use adapter::{AdapterStats, ConnectionId, StreamAdapter, StreamEnvelope, StreamSignal};
pub use client::{QueryClient, QueryOptions, QuerySubscription};
pub use config::CacheConfig;
pub use decode::{Decode, JsonDecoder, TextDecoder};
pub use entry::{CacheEntry, DisposalToken, EntryId, EntrySummary, QueryState, QueryStatus};
pub use error::{CacheError, CacheResult, ParseError, TransportError};
pub use key::QueryKey;
pub use lifecycle::{
    DisposalScheduler, LifecycleManager, ManualScheduler, ScheduledDisposal, SubscriptionHandle,
};
pub use store::{CacheStore, Observer, Unsubscribe};
pub use transport::{
    endpoint_for, MemoryTransport, SseDecoder, SseEvent, SseTransport, Transport, TransportStream,
    WsTransport,
};
