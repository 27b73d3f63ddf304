//! Server-Sent Events transport.
//!
//! The HTTP body is read as a byte stream and cut into events by
//! [`SseDecoder`]. Only events of type `message` are delivered, matching what
//! a browser `EventSource` hands to `onmessage`.

use super::{endpoint_for, Transport, TransportStream};
use crate::error::TransportError;
use crate::key::QueryKey;
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn is_message(&self) -> bool {
        self.event == "message"
    }
}

/// Longest line the decoder will buffer while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines and UTF-8 sequences anywhere; bytes are buffered
/// until a full line is available. Each byte is scanned for a newline once.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    data: String,
    event: String,
    last_id: Option<String>,
    retry: Option<Duration>,
    started: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line: MAX_LINE_BYTES,
            data: String::new(),
            event: String::new(),
            last_id: None,
            retry: None,
            started: false,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on an unterminated line. Exceeding it fails the stream.
    pub fn with_max_line(mut self, bytes: usize) -> Self {
        self.max_line = bytes;
        self
    }

    /// Last `id:` seen, as a reconnecting client would send in `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Last valid `retry:` hint from the server.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Feed one chunk and return every event it completed.
    ///
    /// Fails once a pending line grows past the configured cap; the buffered
    /// bytes are discarded.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut consumed = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let newline = search_from + offset;
            let mut line = &self.buffer[consumed..newline];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let mut text = String::from_utf8_lossy(line).into_owned();
            consumed = newline + 1;
            search_from = consumed;

            if !self.started {
                self.started = true;
                if let Some(stripped) = text.strip_prefix('\u{feff}') {
                    text = stripped.to_string();
                }
            }
            if let Some(event) = self.process_line(&text) {
                events.push(event);
            }
        }
        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            let pending = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(TransportError::LineTooLong {
                limit: self.max_line,
                pending,
            });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = value.to_string(),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.event);
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();
        Some(SseEvent {
            event: if event.is_empty() {
                "message".to_string()
            } else {
                event
            },
            data,
            id: self.last_id.clone(),
        })
    }
}

/// Opens `GET {base_url}/{key}` with `Accept: text/event-stream`.
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SseTransport {
    /// `connect_timeout` bounds connection setup only; the body of a live
    /// stream is read without a deadline.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self, key: &QueryKey) -> Result<TransportStream, TransportError> {
        let url = endpoint_for(&self.base_url, key);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
            });
        }
        debug!(url = %url, "SSE stream opened");

        let events = stream::unfold(
            (Box::pin(response.bytes_stream()), SseDecoder::new(), VecDeque::new()),
            |(mut body, mut decoder, mut ready)| async move {
                loop {
                    if let Some(event) = ready.pop_front() {
                        return Some((Ok(event), (body, decoder, ready)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => match decoder.feed(&chunk) {
                            Ok(events) => ready.extend(events),
                            Err(err) => return Some((Err(err), (body, decoder, ready))),
                        },
                        Some(Err(err)) => {
                            return Some((Err(TransportError::from(err)), (body, decoder, ready)))
                        }
                        None => return None,
                    }
                }
            },
        );

        let messages = events.filter_map(|event: Result<SseEvent, TransportError>| {
            future::ready(match event {
                Ok(event) if event.is_message() => Some(Ok(event.data)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
        });

        Ok(messages.boxed())
    }
}
