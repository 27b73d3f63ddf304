//! Wiring from config to a live [`QuerySubscription`].

use crate::config::{TransportKind, TuiConfig};
use crate::decoder::FeedDecoder;
use crate::error::TuiError;
use crate::notifications::NotificationLevel;
use crate::state::App;
use postfeed_cache::{
    QueryClient, QueryOptions, QuerySubscription, SseTransport, Transport, WsTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often [`refresh`] checks whether a failed entry has been disposed.
const EVICTION_POLL: Duration = Duration::from_millis(10);
/// Slack on top of the grace period before [`refresh`] stops waiting.
const EVICTION_SLACK: Duration = Duration::from_millis(500);

pub fn build_transport(config: &TuiConfig) -> Result<Arc<dyn Transport>, TuiError> {
    let base_url = config.base_url.trim();
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Sse => Arc::new(SseTransport::new(base_url, config.request_timeout())?),
        TransportKind::Websocket => Arc::new(WsTransport::new(base_url)),
    };
    Ok(transport)
}

/// Build the client. Must run inside a tokio runtime.
pub fn build_client(
    config: &TuiConfig,
    transport: Arc<dyn Transport>,
) -> QueryClient<String> {
    QueryClient::new(
        transport,
        FeedDecoder::new(config.payload_format),
        config.cache_config(),
    )
}

pub async fn subscribe(
    client: &QueryClient<String>,
    config: &TuiConfig,
) -> Result<QuerySubscription<String>, TuiError> {
    let subscription = client
        .use_query(config.query_key.trim(), QueryOptions::new())
        .await?;
    tracing::debug!(key = %subscription.key(), entry = ?subscription.entry(), "Subscribed to feed");
    Ok(subscription)
}

/// Subscribe and put the entry's current state on screen.
///
/// The subscription only reports changes after this point, so the snapshot
/// taken here is what shows `Loading` while the transport is connecting.
pub async fn attach_feed(
    client: &QueryClient<String>,
    app: &mut App,
) -> Result<QuerySubscription<String>, TuiError> {
    let mut subscription = subscribe(client, &app.config).await?;
    app.receive(subscription.current());
    Ok(subscription)
}

/// Re-create the feed subscription.
///
/// A healthy entry is picked up again inside the grace period. A failed one
/// never reconnects, so the old subscription is released and the entry left
/// to expire before attaching, which opens a fresh connection.
pub async fn refresh(
    client: &QueryClient<String>,
    app: &mut App,
    previous: Option<QuerySubscription<String>>,
) -> Option<QuerySubscription<String>> {
    let previous_entry = previous.as_ref().and_then(QuerySubscription::entry);
    drop(previous);

    app.begin_refresh();
    if app.feed.is_error() {
        wait_for_eviction(client, app).await;
    }

    match attach_feed(client, app).await {
        Ok(subscription) => {
            let reused = previous_entry.is_some() && subscription.entry() == previous_entry;
            info!(reused, "Resubscribed to feed");
            Some(subscription)
        }
        Err(err) => {
            app.notify(NotificationLevel::Error, format!("Refresh failed: {err}"));
            None
        }
    }
}

async fn wait_for_eviction(client: &QueryClient<String>, app: &App) {
    let key = app.config.query_key.trim();
    let grace = app.config.cache_config().keep_unused_data_for;
    let deadline = tokio::time::Instant::now() + grace + EVICTION_SLACK;
    loop {
        match client.entry(key).await {
            Ok(None) => return,
            Ok(Some(_)) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(EVICTION_POLL).await;
            }
            Ok(Some(summary)) => {
                warn!(
                    key,
                    subscribers = summary.subscriber_count,
                    "Failed entry still cached, reattaching to it"
                );
                return;
            }
            Err(err) => {
                warn!(key, error = %err, "Could not inspect cache entry");
                return;
            }
        }
    }
}
