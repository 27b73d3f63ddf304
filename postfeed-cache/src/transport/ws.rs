//! WebSocket transport.

use super::{endpoint_for, Transport, TransportStream};
use crate::error::TransportError;
use crate::key::QueryKey;
use async_trait::async_trait;
use futures_util::{future, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Connects to `{endpoint}/{key}` and yields every text frame.
///
/// Binary, ping and pong frames are skipped. A close frame ends the stream.
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, key: &QueryKey) -> Result<TransportStream, TransportError> {
        let url = endpoint_for(&self.endpoint, key);
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(url = %url, status = response.status().as_u16(), "WebSocket stream opened");

        let messages = stream
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::from(err))),
                })
            });

        Ok(messages.boxed())
    }
}
