//! Queue client
//!
//! A thin, storage-agnostic adapter over one [`LogStore`]. It validates names
//! before any store call and translates log primitives into publish, consume
//! and acknowledge operations. It holds no locks of its own; atomicity is the
//! store's job.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument};

use inkstream_core::error::Result;
use inkstream_core::naming::{validate_consumer, validate_group, validate_topic};
use inkstream_core::storage::{
    ClaimFilter, DeliveredEntry, LogStore, PendingEntry, StreamEntry, StreamEntryId,
};

/// Publish/consume/ack operations over a shared log store
#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn LogStore>,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient").finish_non_exhaustive()
    }
}

impl QueueClient {
    /// Wrap a log store
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Append `fields` to `topic`, creating it if absent
    #[instrument(skip(self, fields), level = "debug")]
    pub async fn publish(&self, topic: &str, fields: Vec<(Bytes, Bytes)>) -> Result<StreamEntryId> {
        validate_topic(topic)?;
        self.store.append(topic, fields).await
    }

    /// Create `group` on `topic`. Succeeds whether or not the group existed.
    #[instrument(skip(self), level = "debug")]
    pub async fn create_group(&self, topic: &str, group: &str) -> Result<()> {
        validate_topic(topic)?;
        validate_group(group)?;
        let created = self.store.create_group(topic, group).await?;
        debug!(created, "consumer group ready");
        Ok(())
    }

    /// Single non-blocking poll for up to `count` never-delivered entries.
    /// Returns an empty vector when there is nothing new.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        validate_names(topic, group, consumer)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.store.read_group(topic, group, consumer, count).await
    }

    /// Take over entries other consumers have held for at least `min_idle`
    pub async fn claim_stale(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        validate_names(topic, group, consumer)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.store
            .claim_pending(topic, group, consumer, &ClaimFilter::idle_for(min_idle), count)
            .await
    }

    /// Re-deliver this consumer's own pending entries immediately
    pub async fn retry_own(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        validate_names(topic, group, consumer)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.store
            .claim_pending(topic, group, consumer, &ClaimFilter::owned_by(consumer), count)
            .await
    }

    /// Acknowledge one entry. Unknown or already-acked IDs are a no-op.
    pub async fn ack(&self, topic: &str, group: &str, id: StreamEntryId) -> Result<()> {
        self.ack_many(topic, group, &[id]).await.map(|_| ())
    }

    /// Acknowledge several entries, returning how many were pending
    pub async fn ack_many(&self, topic: &str, group: &str, ids: &[StreamEntryId]) -> Result<u64> {
        validate_topic(topic)?;
        validate_group(group)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let acked = self.store.ack(topic, group, ids).await?;
        if (acked as usize) < ids.len() {
            debug!(topic, group, requested = ids.len(), acked, "ack of non-pending ids ignored");
        }
        Ok(acked)
    }

    /// Remove the topic with all its entries and groups
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_stream(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        let existed = self.store.delete(topic).await?;
        debug!(existed, "stream deleted");
        Ok(())
    }

    /// All currently existing topics
    pub async fn list_streams(&self) -> Result<Vec<String>> {
        self.store.list_topics().await
    }

    /// Inspect the group's pending entries
    pub async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        validate_topic(topic)?;
        validate_group(group)?;
        self.store.pending(topic, group, count).await
    }

    /// Number of entries in `topic`
    pub async fn len(&self, topic: &str) -> Result<u64> {
        validate_topic(topic)?;
        self.store.len(topic).await
    }

    /// First `count` entries of `topic`
    pub async fn read_range(&self, topic: &str, count: usize) -> Result<Vec<StreamEntry>> {
        validate_topic(topic)?;
        self.store.range(topic, count).await
    }

    /// Check the store is reachable
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

fn validate_names(topic: &str, group: &str, consumer: &str) -> Result<()> {
    validate_topic(topic)?;
    validate_group(group)?;
    validate_consumer(consumer)
}
