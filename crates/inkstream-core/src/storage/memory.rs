//! In-process log store
//!
//! All topics live in one map behind a `parking_lot::RwLock`. Every mutating
//! operation runs under a single write guard, which makes append, claim, ack,
//! group creation and deletion atomic with respect to each other.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use super::streams::{now_ms, Stream, StreamEntry, StreamEntryId};
use super::{ClaimFilter, DeliveredEntry, LogStore, PendingEntry};
use crate::error::{InkstreamError, Result};

/// Log store kept entirely in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    streams: RwLock<HashMap<String, Stream>>,
}

impl MemoryLogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics currently held
    pub fn topic_count(&self) -> usize {
        self.streams.read().len()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, topic: &str, fields: Vec<(Bytes, Bytes)>) -> Result<StreamEntryId> {
        let mut streams = self.streams.write();
        let stream = streams.entry(topic.to_string()).or_default();
        let id = stream.add(fields, now_ms());
        trace!(topic, %id, "appended entry");
        Ok(id)
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<bool> {
        let mut streams = self.streams.write();
        let stream = streams.entry(topic.to_string()).or_default();
        Ok(stream.create_group(group, StreamEntryId::MIN))
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        let mut streams = self.streams.write();
        let entries = streams
            .get_mut(topic)
            .and_then(|s| s.read_group(group, consumer, count, now_ms()))
            .ok_or_else(|| InkstreamError::group_not_found(topic, group))?;

        Ok(entries
            .into_iter()
            .map(|entry| DeliveredEntry {
                entry,
                delivery_count: 1,
            })
            .collect())
    }

    async fn claim_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        filter: &ClaimFilter,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        let min_idle_ms = filter.min_idle.as_millis() as u64;
        let mut streams = self.streams.write();
        let claimed = streams
            .get_mut(topic)
            .and_then(|s| {
                s.claim_pending(
                    group,
                    consumer,
                    min_idle_ms,
                    filter.owner.as_deref(),
                    count,
                    now_ms(),
                )
            })
            .ok_or_else(|| InkstreamError::group_not_found(topic, group))?;

        Ok(claimed
            .into_iter()
            .map(|(entry, delivery_count)| DeliveredEntry {
                entry,
                delivery_count,
            })
            .collect())
    }

    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.read();
        let group_state = streams
            .get(topic)
            .and_then(|s| s.get_group(group))
            .ok_or_else(|| InkstreamError::group_not_found(topic, group))?;

        let now = now_ms();
        Ok(group_state
            .pending
            .values()
            .take(count)
            .map(|pe| PendingEntry {
                id: pe.id,
                consumer: pe.consumer.clone(),
                idle: Duration::from_millis(pe.idle_ms(now)),
                delivery_count: pe.delivery_count,
            })
            .collect())
    }

    async fn ack(&self, topic: &str, group: &str, ids: &[StreamEntryId]) -> Result<u64> {
        let mut streams = self.streams.write();
        let acked = streams
            .get_mut(topic)
            .and_then(|s| s.get_group_mut(group))
            .map(|g| g.ack(ids))
            .unwrap_or(0);
        Ok(acked as u64)
    }

    async fn delete(&self, topic: &str) -> Result<bool> {
        Ok(self.streams.write().remove(topic).is_some())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut topics: Vec<String> = self.streams.read().keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn len(&self, topic: &str) -> Result<u64> {
        Ok(self
            .streams
            .read()
            .get(topic)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn range(&self, topic: &str, count: usize) -> Result<Vec<StreamEntry>> {
        Ok(self
            .streams
            .read()
            .get(topic)
            .map(|s| s.range(&StreamEntryId::MIN, &StreamEntryId::MAX, Some(count)))
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn body(v: &str) -> Vec<(Bytes, Bytes)> {
        vec![(Bytes::from_static(b"body"), Bytes::from(v.to_string()))]
    }

    #[tokio::test]
    async fn test_append_creates_topic() {
        let store = MemoryLogStore::new();
        let id = store.append("orders", body("a")).await.unwrap();
        assert!(id > StreamEntryId::MIN);
        assert_eq!(store.len("orders").await.unwrap(), 1);
        assert_eq!(store.list_topics().await.unwrap(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_read_group_without_group_is_typed_error() {
        let store = MemoryLogStore::new();
        store.append("orders", body("a")).await.unwrap();
        let err = store.read_group("orders", "g", "c", 1).await.unwrap_err();
        assert!(matches!(err, InkstreamError::GroupNotFound { .. }));

        let err = store.read_group("missing", "g", "c", 1).await.unwrap_err();
        assert!(matches!(err, InkstreamError::GroupNotFound { .. }));
    }

    #[tokio::test]
    async fn test_group_sees_history() {
        let store = MemoryLogStore::new();
        store.append("t", body("before")).await.unwrap();
        assert!(store.create_group("t", "g").await.unwrap());
        assert!(!store.create_group("t", "g").await.unwrap());

        let got = store.read_group("t", "g", "c", 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].delivery_count, 1);
    }

    #[tokio::test]
    async fn test_ack_unknown_is_noop() {
        let store = MemoryLogStore::new();
        let bogus = [StreamEntryId::new(12345, 6)];
        assert_eq!(store.ack("nope", "g", &bogus).await.unwrap(), 0);
        store.create_group("t", "g").await.unwrap();
        assert_eq!(store.ack("t", "g", &bogus).await.unwrap(), 0);
        assert_eq!(store.ack("t", "other", &bogus).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_reports_delivery_counts() {
        let store = MemoryLogStore::new();
        store.create_group("t", "g").await.unwrap();
        let id = store.append("t", body("x")).await.unwrap();
        store.read_group("t", "g", "c1", 1).await.unwrap();
        store
            .claim_pending("t", "g", "c1", &ClaimFilter::owned_by("c1"), 10)
            .await
            .unwrap();

        let pending = store.pending("t", "g", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].consumer, "c1");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_delete_is_total() {
        let store = MemoryLogStore::new();
        store.create_group("t", "g").await.unwrap();
        store.append("t", body("x")).await.unwrap();
        store.read_group("t", "g", "c", 1).await.unwrap();

        assert!(store.delete("t").await.unwrap());
        assert!(!store.delete("t").await.unwrap());
        assert_eq!(store.len("t").await.unwrap(), 0);
        assert!(store.range("t", 10).await.unwrap().is_empty());
        assert!(store.list_topics().await.unwrap().is_empty());
        assert!(store.pending("t", "g", 10).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_unique_ids() {
        let store = Arc::new(MemoryLogStore::new());
        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..50 {
                    ids.push(store.append("t", body(&format!("{task}-{i}"))).await.unwrap());
                }
                ids
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 400);
        assert_eq!(store.len("t").await.unwrap(), 400);
    }
}
