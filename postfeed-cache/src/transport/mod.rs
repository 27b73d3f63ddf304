//! Push transports.
//!
//! A [`Transport`] turns a query key into a stream of text payloads. The
//! [`StreamAdapter`](crate::adapter::StreamAdapter) owns the consuming side;
//! transports never touch the cache.
//!
//! - [`SseTransport`]: Server-Sent Events over a streaming HTTP body
//! - [`WsTransport`]: WebSocket text frames
//! - [`MemoryTransport`]: in-process, driven by the caller

pub mod memory;
pub mod sse;
pub mod ws;

pub use memory::MemoryTransport;
pub use sse::{SseDecoder, SseEvent, SseTransport};
pub use ws::WsTransport;

use crate::error::TransportError;
use crate::key::QueryKey;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Inbound payloads for one connection. The stream ending means the remote
/// closed the connection; an `Err` item is a connection failure.
pub type TransportStream = BoxStream<'static, Result<String, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open one connection scoped to `key`. Resolves once the connection is
    /// established.
    async fn connect(&self, key: &QueryKey) -> Result<TransportStream, TransportError>;
}

/// `{base_url}/{key}` with exactly one separating slash.
pub fn endpoint_for(base_url: &str, key: &QueryKey) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        key.as_str().trim_start_matches('/')
    )
}
