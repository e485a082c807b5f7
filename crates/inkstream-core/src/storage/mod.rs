//! Storage module for inkstream
//!
//! Defines the contract every log store must honour and ships an in-process
//! implementation.
//!
//! ## Architecture
//!
//! ```text
//! QueueClient ──► LogStore (trait)
//!                   ├── MemoryLogStore   (this crate, one RwLock over all topics)
//!                   └── RedisLogStore    (inkstream-redis, Redis Streams)
//! ```
//!
//! | Operation       | Redis Streams equivalent              |
//! |-----------------|---------------------------------------|
//! | `append`        | `XADD key * field value ...`          |
//! | `create_group`  | `XGROUP CREATE key group 0 MKSTREAM`  |
//! | `read_group`    | `XREADGROUP GROUP g c COUNT n STREAMS key >` |
//! | `claim_pending` | `XPENDING ... IDLE` + `XCLAIM`        |
//! | `pending`       | `XPENDING key group - + count`        |
//! | `ack`           | `XACK key group id ...`               |
//! | `delete`        | `DEL key`                             |
//! | `list_topics`   | `SCAN MATCH prefix* TYPE stream`      |
//!
//! Every mutation must be atomic at the store level; callers perform no
//! client-side locking and must not assume they are the only writer.

mod memory;
pub mod streams;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use memory::MemoryLogStore;
pub use streams::{
    now_ms, Stream, StreamConsumer, StreamConsumerGroup, StreamEntry, StreamEntryId,
    StreamPendingEntry,
};

/// An entry handed to a consumer, with how many times it has been delivered
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredEntry {
    /// The log entry
    pub entry: StreamEntry,
    /// Delivery attempts so far, including this one
    pub delivery_count: u64,
}

/// Snapshot of one PEL slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Entry ID
    pub id: StreamEntryId,
    /// Consumer currently holding the entry
    pub consumer: String,
    /// Time since the last delivery
    pub idle: Duration,
    /// Delivery attempts so far
    pub delivery_count: u64,
}

/// Selects which pending entries a claim may take over
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    /// Only entries idle for at least this long
    pub min_idle: Duration,
    /// Only entries currently held by this consumer
    pub owner: Option<String>,
}

impl ClaimFilter {
    /// Entries idle at least `min_idle`, held by anyone
    pub fn idle_for(min_idle: Duration) -> Self {
        Self {
            min_idle,
            owner: None,
        }
    }

    /// Every entry held by `owner`, regardless of idle time
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            min_idle: Duration::ZERO,
            owner: Some(owner.into()),
        }
    }
}

/// Contract of an append-only log with consumer groups.
///
/// Topic, group and consumer names are validated by the caller.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an entry, creating the topic if absent. Returns the assigned ID.
    async fn append(&self, topic: &str, fields: Vec<(Bytes, Bytes)>) -> Result<StreamEntryId>;

    /// Create `group` on `topic` positioned at the beginning of the log,
    /// creating the topic if absent. Returns false if the group existed; the
    /// existing group is not modified.
    async fn create_group(&self, topic: &str, group: &str) -> Result<bool>;

    /// Claim up to `count` never-delivered entries for `consumer`.
    /// An empty vector means nothing new; a missing group is `GroupNotFound`.
    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>>;

    /// Move pending entries matching `filter` to `consumer`, incrementing
    /// their delivery count.
    async fn claim_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        filter: &ClaimFilter,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>>;

    /// Inspect up to `count` PEL entries, oldest first
    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>>;

    /// Remove IDs from the group's PEL. Returns how many were pending; unknown
    /// IDs, groups or topics count zero.
    async fn ack(&self, topic: &str, group: &str, ids: &[StreamEntryId]) -> Result<u64>;

    /// Delete the topic with all entries, groups and PELs. Returns whether it existed.
    async fn delete(&self, topic: &str) -> Result<bool>;

    /// Names of all existing topics
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Number of entries in the topic; 0 if absent
    async fn len(&self, topic: &str) -> Result<u64>;

    /// First `count` entries of the topic in ID order
    async fn range(&self, topic: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;
}
