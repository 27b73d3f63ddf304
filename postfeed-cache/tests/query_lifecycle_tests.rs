//! End-to-end tests for the query facade over the in-process transport.

use postfeed_cache::{
    CacheConfig, CacheStore, JsonDecoder, LifecycleManager, ManualScheduler, MemoryTransport,
    QueryClient, QueryKey, QueryOptions, QueryState, QueryStatus, StreamAdapter,
    SubscriptionHandle, TextDecoder, Transport,
};
use proptest::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn text_client(transport: &MemoryTransport) -> QueryClient<String> {
    QueryClient::new(
        Arc::new(transport.clone()),
        TextDecoder,
        CacheConfig::default(),
    )
}

async fn wait_evicted<T>(client: &QueryClient<T>, key: &str)
where
    T: Clone + Send + Sync + 'static,
{
    for _ in 0..100 {
        if client.entry(key).await.unwrap().is_none() {
            // Let the aborted connection task wind down.
            tokio::time::sleep(Duration::from_millis(1)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("entry {key} was never evicted");
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_posts_stream_accumulates_then_keeps_items_on_error() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    transport.wait_connected("posts").await;
    posts
        .wait_for(|state| state.status == QueryStatus::Ready)
        .await
        .unwrap();

    assert!(transport.publish("posts", "hello"));
    assert!(transport.publish("posts", "world"));
    let state = posts
        .wait_for(|state| state.items().len() == 2)
        .await
        .unwrap();
    assert_eq!(state.items(), ["hello", "world"]);
    assert_eq!(state.error, None);

    assert!(transport.fail("posts", "upstream went away"));
    let state = posts.wait_for(QueryState::is_error).await.unwrap();
    assert_eq!(state.items(), ["hello", "world"]);
    assert!(state
        .error
        .as_deref()
        .is_some_and(|error| error.contains("upstream went away")));

    // No automatic reconnect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connect_count("posts"), 1);

    drop(posts);
    wait_evicted(&client, "posts").await;
    let stats = client.stats().await.unwrap();
    assert_eq!((stats.opened, stats.closed), (1, 1));
    assert!(stats.open_keys.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_is_reported_as_error() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    transport.wait_connected("posts").await;
    transport.publish("posts", "only");
    posts
        .wait_for(|state| state.items().len() == 1)
        .await
        .unwrap();

    assert!(transport.hang_up("posts"));
    let state = posts.wait_for(QueryState::is_error).await.unwrap();
    assert_eq!(state.items(), ["only"]);
    assert_eq!(state.error.as_deref(), Some("Stream closed by remote"));
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_surfaces_error() {
    let transport = MemoryTransport::new();
    transport.refuse("posts");
    let client = text_client(&transport);

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    let state = posts.wait_for(QueryState::is_error).await.unwrap();
    assert!(state.items().is_empty());
    assert!(state
        .error
        .as_deref()
        .is_some_and(|error| error.starts_with("Connection refused")));
}

#[tokio::test(start_paused = true)]
async fn test_two_subscribers_share_one_connection() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut first = client.use_query("posts", QueryOptions::new()).await.unwrap();
    let mut second = client.use_query("posts", QueryOptions::new()).await.unwrap();
    assert_eq!(first.entry(), second.entry());

    transport.wait_connected("posts").await;
    transport.publish("posts", "a");
    transport.publish("posts", "b");

    let seen_first = first.wait_for(|state| state.items().len() == 2).await.unwrap();
    let seen_second = second.wait_for(|state| state.items().len() == 2).await.unwrap();
    assert_eq!(seen_first, seen_second);
    assert_eq!(transport.connect_count("posts"), 1);

    let summary = client.entry("posts").await.unwrap().unwrap();
    assert_eq!(summary.subscriber_count, 2);

    first.unsubscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let summary = client.entry("posts").await.unwrap().unwrap();
    assert_eq!(summary.subscriber_count, 1);
    assert!(!summary.disposal_pending);
    assert!(transport.is_connected("posts"));

    transport.publish("posts", "c");
    let state = second.wait_for(|state| state.items().len() == 3).await.unwrap();
    assert_eq!(state.items(), ["a", "b", "c"]);

    drop(second);
    wait_evicted(&client, "posts").await;
    assert!(!transport.is_connected("posts"));
}

#[tokio::test(start_paused = true)]
async fn test_reattach_within_grace_reuses_entry_and_connection() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);
    let options = QueryOptions::new().with_keep_unused_data_for(Duration::from_secs(5));

    let mut posts = client.use_query("posts", options.clone()).await.unwrap();
    let instance = posts.entry();
    transport.wait_connected("posts").await;
    transport.publish("posts", "kept");
    posts.wait_for(|state| state.items().len() == 1).await.unwrap();
    drop(posts);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let summary = client.entry("posts").await.unwrap().unwrap();
    assert!(summary.disposal_pending);

    let mut posts = client.use_query("posts", options).await.unwrap();
    assert_eq!(posts.entry(), instance);
    assert_eq!(posts.current().items(), ["kept"]);
    assert_eq!(transport.connect_count("posts"), 1);

    // The cancelled disposal must not fire later.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let summary = client.entry("posts").await.unwrap().unwrap();
    assert_eq!(summary.subscriber_count, 1);
    assert!(!summary.disposal_pending);

    drop(posts);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(client.entry("posts").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reattach_after_eviction_starts_fresh() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    let first_instance = posts.entry();
    transport.wait_connected("posts").await;
    transport.publish("posts", "old");
    posts.wait_for(|state| state.items().len() == 1).await.unwrap();
    drop(posts);
    wait_evicted(&client, "posts").await;

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    assert_ne!(posts.entry(), first_instance);
    assert!(posts.current().items().is_empty());
    transport.wait_connected("posts").await;
    assert_eq!(transport.connect_count("posts"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_registers_nothing() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut posts = client
        .use_query("posts", QueryOptions::new().with_skip(true))
        .await
        .unwrap();
    assert!(posts.is_skipped());
    assert_eq!(posts.entry(), None);
    assert_eq!(posts.current().status, QueryStatus::Uninitialized);
    assert!(!posts.changed().await);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.entry("posts").await.unwrap().is_none());
    assert_eq!(transport.connect_count("posts"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reads_do_not_create_entries() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    assert!(client.entry("posts").await.unwrap().is_none());
    let stats = client.stats().await.unwrap();
    assert_eq!(stats.opened, 0);
    assert_eq!(transport.connect_count("posts"), 0);
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Post {
    id: u32,
    title: String,
}

#[tokio::test(start_paused = true)]
async fn test_malformed_event_is_skipped() {
    let transport = MemoryTransport::new();
    let client: QueryClient<Post> = QueryClient::new(
        Arc::new(transport.clone()),
        JsonDecoder::<Post>::new(),
        CacheConfig::default(),
    );

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    transport.wait_connected("posts").await;
    transport.publish("posts", r#"{"id":1,"title":"first"}"#);
    transport.publish("posts", "not json at all");
    transport.publish("posts", r#"{"id":3,"title":"third"}"#);

    let state = posts.wait_for(|state| state.items().len() == 2).await.unwrap();
    let ids: Vec<u32> = state.items().iter().map(|post| post.id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(state.status, QueryStatus::Ready);
    assert_eq!(state.items()[1].title, "third");

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.delivered.get(&QueryKey::from("posts")), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_isolated() {
    let transport = MemoryTransport::new();
    let client = text_client(&transport);

    let mut posts = client.use_query("posts", QueryOptions::new()).await.unwrap();
    let mut alerts = client.use_query("alerts", QueryOptions::new()).await.unwrap();
    transport.wait_connected("posts").await;
    transport.wait_connected("alerts").await;

    transport.publish("alerts", "disk full");
    transport.fail("posts", "gone");

    posts.wait_for(QueryState::is_error).await.unwrap();
    let state = alerts.wait_for(|state| state.items().len() == 1).await.unwrap();
    assert_eq!(state.status, QueryStatus::Ready);
    assert_eq!(state.items(), ["disk full"]);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Attach(usize),
    Detach(usize),
    Fire,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Attach),
        (0..8usize).prop_map(Op::Detach),
        Just(Op::Fire),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Subscriber counts track live handles, and an entry exists exactly
    /// while its connection does.
    #[test]
    fn prop_churn_keeps_counts_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();

        let keys = ["posts", "alerts", "digest"].map(QueryKey::from);
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let (signals, _signals_rx) = mpsc::unbounded_channel();
        let mut store: CacheStore<String> = CacheStore::new();
        let mut adapter = StreamAdapter::new(transport, TextDecoder, signals);
        let mut manager = LifecycleManager::new(ManualScheduler::new(), Duration::ZERO);
        let mut handles: Vec<SubscriptionHandle> = Vec::new();

        for op in ops {
            match op {
                Op::Attach(k) => {
                    let handle = manager.attach(&mut store, &mut adapter, &keys[k], None).unwrap();
                    handles.push(handle);
                }
                Op::Detach(i) => {
                    if !handles.is_empty() {
                        let handle = handles.remove(i % handles.len());
                        manager.detach(&mut store, handle).unwrap();
                    }
                }
                Op::Fire => {
                    let due = manager.scheduler_mut().drain();
                    for disposal in due {
                        manager.expire(&mut store, &mut adapter, &disposal.key, disposal.token);
                    }
                }
            }

            for key in &keys {
                let live = handles.iter().filter(|handle| handle.key() == key).count();
                match store.get(key) {
                    Some(entry) => {
                        prop_assert_eq!(entry.subscriber_count(), live);
                        prop_assert_eq!(entry.disposal_pending(), live == 0);
                        prop_assert!(adapter.is_open(key));
                    }
                    None => {
                        prop_assert_eq!(live, 0);
                        prop_assert!(!adapter.is_open(key));
                    }
                }
            }
        }
    }

    /// Attach and detach churn on one key without a timer firing never
    /// reopens the connection; the final disposal closes it exactly once.
    #[test]
    fn prop_churn_on_one_key_opens_and_closes_once(steps in prop::collection::vec(any::<bool>(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();

        let key = QueryKey::from("posts");
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let (signals, _signals_rx) = mpsc::unbounded_channel();
        let mut store: CacheStore<String> = CacheStore::new();
        let mut adapter = StreamAdapter::new(transport, TextDecoder, signals);
        let mut manager = LifecycleManager::new(ManualScheduler::new(), Duration::ZERO);
        let mut handles = vec![manager.attach(&mut store, &mut adapter, &key, None).unwrap()];

        for attach in steps {
            if attach {
                handles.push(manager.attach(&mut store, &mut adapter, &key, None).unwrap());
            } else if let Some(handle) = handles.pop() {
                manager.detach(&mut store, handle).unwrap();
            }
            prop_assert_eq!(adapter.stats().opened, 1);
            prop_assert_eq!(adapter.stats().closed, 0);
        }

        for handle in handles.drain(..) {
            manager.detach(&mut store, handle).unwrap();
        }
        for disposal in manager.scheduler_mut().drain() {
            manager.expire(&mut store, &mut adapter, &disposal.key, disposal.token);
        }

        let stats = adapter.stats();
        prop_assert_eq!(stats.opened, 1);
        prop_assert_eq!(stats.closed, 1);
        prop_assert!(!store.contains(&key));
        prop_assert!(!adapter.is_open(&key));
    }

    /// Items come out in the order the transport delivered them.
    #[test]
    fn prop_items_preserve_arrival_order(payloads in prop::collection::vec("[a-z0-9 ]{0,12}", 1..30)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let received = rt.block_on(async {
            let transport = MemoryTransport::new();
            let client = text_client(&transport);
            let mut feed = client.use_query("posts", QueryOptions::new()).await.unwrap();
            transport.wait_connected("posts").await;
            for payload in &payloads {
                transport.publish("posts", payload.as_str());
            }
            let expected = payloads.len();
            let state = feed.wait_for(|state| state.items().len() == expected).await.unwrap();
            state.items().to_vec()
        });

        prop_assert_eq!(received, payloads);
    }
}
