//! Cache entry and the read-only state snapshot handed to observers.

use crate::key::QueryKey;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of a cache entry as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// No entry; reported for skipped queries.
    Uninitialized,
    /// Entry exists, connection not yet confirmed.
    Loading,
    /// Connection opened or at least one item received.
    Ready,
    /// Connection failed. Accumulated items are kept.
    Error,
}

impl QueryStatus {
    pub fn accepts_items(&self) -> bool {
        matches!(self, QueryStatus::Loading | QueryStatus::Ready)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryStatus::Uninitialized => "uninitialized",
            QueryStatus::Loading => "loading",
            QueryStatus::Ready => "ready",
            QueryStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Identity of one entry instance. A key that is evicted and subscribed again
/// gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub(crate) u64);

impl EntryId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Token of a pending disposal. Only the token currently stored on the entry
/// may evict it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisposalToken(pub(crate) u64);

/// Materialized state for one query key. Owned exclusively by the
/// [`CacheStore`](crate::store::CacheStore).
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub(crate) key: QueryKey,
    pub(crate) instance: EntryId,
    pub(crate) status: QueryStatus,
    pub(crate) value: Arc<Vec<T>>,
    pub(crate) error: Option<String>,
    pub(crate) subscriber_count: usize,
    pub(crate) disposal: Option<DisposalToken>,
}

impl<T: Clone> CacheEntry<T> {
    pub(crate) fn new(key: QueryKey, instance: EntryId) -> Self {
        Self {
            key,
            instance,
            status: QueryStatus::Loading,
            value: Arc::new(Vec::new()),
            error: None,
            subscriber_count: 0,
            disposal: None,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn instance(&self) -> EntryId {
        self.instance
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn value(&self) -> &[T] {
        &self.value
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn disposal_pending(&self) -> bool {
        self.disposal.is_some()
    }

    /// Snapshot for observers. Shares the item buffer until the next append.
    pub fn state(&self) -> QueryState<T> {
        QueryState {
            status: self.status,
            data: Arc::clone(&self.value),
            error: self.error.clone(),
        }
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            instance: self.instance,
            status: self.status,
            len: self.value.len(),
            error: self.error.clone(),
            subscriber_count: self.subscriber_count,
            disposal_pending: self.disposal.is_some(),
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        Arc::make_mut(&mut self.value).push(item);
    }
}

/// What the render layer sees: `{ value, status, error }`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Arc<Vec<T>>,
    pub error: Option<String>,
}

impl<T> QueryState<T> {
    pub fn uninitialized() -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            data: Arc::new(Vec::new()),
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn items(&self) -> &[T] {
        &self.data
    }
}

/// Item-free view of an entry for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    #[serde(serialize_with = "serialize_key")]
    pub key: QueryKey,
    pub instance: EntryId,
    pub status: QueryStatus,
    pub len: usize,
    pub error: Option<String>,
    pub subscriber_count: usize,
    pub disposal_pending: bool,
}

fn serialize_key<S: serde::Serializer>(key: &QueryKey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_loading_and_empty() {
        let entry: CacheEntry<String> = CacheEntry::new(QueryKey::new("posts"), EntryId(1));
        assert_eq!(entry.status(), QueryStatus::Loading);
        assert!(entry.value().is_empty());
        assert_eq!(entry.subscriber_count(), 0);
        assert!(!entry.disposal_pending());
    }

    #[test]
    fn snapshot_is_not_affected_by_later_appends() {
        let mut entry: CacheEntry<String> = CacheEntry::new(QueryKey::new("posts"), EntryId(1));
        entry.push("a".to_string());
        let before = entry.state();
        entry.push("b".to_string());
        assert_eq!(before.items(), ["a".to_string()]);
        assert_eq!(entry.value(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn summary_serializes_key_as_string() {
        let entry: CacheEntry<String> = CacheEntry::new(QueryKey::new("posts"), EntryId(7));
        let json = serde_json::to_value(entry.summary()).unwrap();
        assert_eq!(json["key"], "posts");
        assert_eq!(json["status"], "loading");
        assert_eq!(json["instance"], 7);
    }
}
