//! Stream data structures
//!
//! An append-only log of field/value entries plus the consumer groups reading
//! it. Each group owns a cursor (`last_delivered_id`) and a Pending Entries
//! List (PEL) of entries handed to one of its consumers but not yet
//! acknowledged.
//!
//! All methods take the current time explicitly so callers holding a lock can
//! use a single timestamp for the whole operation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::InkstreamError;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Stream entry ID (timestamp-sequence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamEntryId {
    /// Milliseconds timestamp
    pub ms: u64,
    /// Sequence number within the millisecond
    pub seq: u64,
}

impl StreamEntryId {
    /// Smallest possible ID; never assigned to an entry
    pub const MIN: StreamEntryId = StreamEntryId { ms: 0, seq: 0 };

    /// Largest possible ID
    pub const MAX: StreamEntryId = StreamEntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Create a new stream entry ID
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse a stream ID from string (format: "ms-seq" or "ms")
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(2, '-');
        let ms = parts.next()?.parse().ok()?;
        let seq = match parts.next() {
            Some(seq) => seq.parse().ok()?,
            None => 0,
        };
        Some(Self { ms, seq })
    }

    /// The smallest ID strictly greater than this one. Saturates at
    /// [`StreamEntryId::MAX`], which is its own successor.
    pub fn successor(&self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self::new(self.ms, seq),
            None => match self.ms.checked_add(1) {
                Some(ms) => Self::new(ms, 0),
                None => Self::MAX,
            },
        }
    }
}

impl fmt::Display for StreamEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamEntryId {
    type Err = InkstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| InkstreamError::InvalidArgument(format!("invalid stream ID '{s}'")))
    }
}

/// A stream entry containing field-value pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// The entry ID
    pub id: StreamEntryId,
    /// Field-value pairs
    pub fields: Vec<(Bytes, Bytes)>,
}

/// A pending entry in a consumer group (PEL - Pending Entries List)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPendingEntry {
    /// The message ID
    pub id: StreamEntryId,
    /// Consumer that owns this pending entry
    pub consumer: String,
    /// Time when the message was last delivered (milliseconds since Unix epoch)
    pub delivery_time: u64,
    /// Number of times this message was delivered
    pub delivery_count: u64,
}

impl StreamPendingEntry {
    /// Milliseconds since the last delivery
    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.delivery_time)
    }
}

/// A consumer in a consumer group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConsumer {
    /// Consumer name
    pub name: String,
    /// Pending entries for this consumer (message IDs)
    pub pending: HashSet<StreamEntryId>,
    /// Last time this consumer was seen (milliseconds since Unix epoch)
    pub seen_time: u64,
}

impl StreamConsumer {
    /// Create a new consumer
    pub fn new(name: String, now: u64) -> Self {
        Self {
            name,
            pending: HashSet::new(),
            seen_time: now,
        }
    }
}

/// A consumer group for a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConsumerGroup {
    /// Group name
    pub name: String,
    /// Last delivered ID (entries after this are available to consumers)
    pub last_delivered_id: StreamEntryId,
    /// Pending entries list (PEL) - maps message ID to pending entry info
    pub pending: BTreeMap<StreamEntryId, StreamPendingEntry>,
    /// Consumers in this group
    pub consumers: HashMap<String, StreamConsumer>,
    /// Number of entries read from the stream
    pub entries_read: u64,
}

impl StreamConsumerGroup {
    /// Create a new consumer group
    pub fn new(name: String, last_delivered_id: StreamEntryId) -> Self {
        Self {
            name,
            last_delivered_id,
            pending: BTreeMap::new(),
            consumers: HashMap::new(),
            entries_read: 0,
        }
    }

    /// Get or create a consumer
    pub fn get_or_create_consumer(&mut self, consumer_name: &str, now: u64) -> &mut StreamConsumer {
        let consumer = self
            .consumers
            .entry(consumer_name.to_string())
            .or_insert_with(|| StreamConsumer::new(consumer_name.to_string(), now));
        consumer.seen_time = now;
        consumer
    }

    /// Register a first delivery of `id` to `consumer_name`
    pub fn add_pending(&mut self, id: StreamEntryId, consumer_name: &str, now: u64) {
        self.pending.insert(
            id,
            StreamPendingEntry {
                id,
                consumer: consumer_name.to_string(),
                delivery_time: now,
                delivery_count: 1,
            },
        );
        self.get_or_create_consumer(consumer_name, now)
            .pending
            .insert(id);
    }

    /// Acknowledge messages. Unknown IDs are ignored.
    pub fn ack(&mut self, ids: &[StreamEntryId]) -> usize {
        let mut count = 0;
        for id in ids {
            if let Some(pending) = self.pending.remove(id) {
                if let Some(consumer) = self.consumers.get_mut(&pending.consumer) {
                    consumer.pending.remove(id);
                }
                count += 1;
            }
        }
        count
    }

    /// Get the number of pending entries
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// IDs idle for at least `min_idle_ms`, oldest first, optionally restricted
    /// to one owner.
    pub fn idle_pending(
        &self,
        min_idle_ms: u64,
        owner: Option<&str>,
        count: usize,
        now: u64,
    ) -> Vec<StreamEntryId> {
        self.pending
            .values()
            .filter(|pe| pe.idle_ms(now) >= min_idle_ms)
            .filter(|pe| owner.map_or(true, |o| pe.consumer == o))
            .take(count)
            .map(|pe| pe.id)
            .collect()
    }

    /// Transfer pending entries to `new_consumer`, bumping their delivery
    /// count. IDs not in the PEL are skipped. Returns `(id, delivery_count)`
    /// for every claimed entry.
    pub fn claim(
        &mut self,
        ids: &[StreamEntryId],
        new_consumer: &str,
        now: u64,
    ) -> Vec<(StreamEntryId, u64)> {
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(pe) = self.pending.get_mut(id) else {
                continue;
            };

            let previous_owner = std::mem::replace(&mut pe.consumer, new_consumer.to_string());
            pe.delivery_time = now;
            pe.delivery_count += 1;
            let delivery_count = pe.delivery_count;

            if let Some(old) = self.consumers.get_mut(&previous_owner) {
                old.pending.remove(id);
            }
            self.get_or_create_consumer(new_consumer, now)
                .pending
                .insert(*id);

            claimed.push((*id, delivery_count));
        }

        claimed
    }

    /// Drop PEL entries whose stream entry no longer exists
    fn forget(&mut self, id: &StreamEntryId) {
        if let Some(pe) = self.pending.remove(id) {
            if let Some(c) = self.consumers.get_mut(&pe.consumer) {
                c.pending.remove(id);
            }
        }
    }
}

/// Append-only stream with consumer groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Entries ordered by ID
    pub entries: BTreeMap<StreamEntryId, Vec<(Bytes, Bytes)>>,
    /// Last generated ID
    pub last_id: StreamEntryId,
    /// Consumer groups
    pub consumer_groups: HashMap<String, StreamConsumerGroup>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    /// Create a new empty stream
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_id: StreamEntryId::MIN,
            consumer_groups: HashMap::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stream holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a consumer group. Returns false if it already exists, in which
    /// case the existing group is left untouched.
    pub fn create_group(&mut self, name: &str, start_id: StreamEntryId) -> bool {
        if self.consumer_groups.contains_key(name) {
            return false;
        }
        self.consumer_groups.insert(
            name.to_string(),
            StreamConsumerGroup::new(name.to_string(), start_id),
        );
        true
    }

    /// Get a consumer group
    pub fn get_group(&self, name: &str) -> Option<&StreamConsumerGroup> {
        self.consumer_groups.get(name)
    }

    /// Get a mutable consumer group
    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut StreamConsumerGroup> {
        self.consumer_groups.get_mut(name)
    }

    /// Delete a consumer group
    pub fn delete_group(&mut self, name: &str) -> bool {
        self.consumer_groups.remove(name).is_some()
    }

    /// Append an entry with an auto-generated ID.
    ///
    /// IDs stay strictly increasing even if the clock moves backwards: the
    /// sequence is bumped on the last ID's millisecond instead.
    pub fn add(&mut self, fields: Vec<(Bytes, Bytes)>, now: u64) -> StreamEntryId {
        let new_id = if now > self.last_id.ms {
            StreamEntryId::new(now, 0)
        } else {
            self.last_id.successor()
        };

        self.entries.insert(new_id, fields);
        self.last_id = new_id;
        new_id
    }

    /// Get entries in an inclusive range
    pub fn range(
        &self,
        start: &StreamEntryId,
        end: &StreamEntryId,
        count: Option<usize>,
    ) -> Vec<StreamEntry> {
        self.entries
            .range(start..=end)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Hand up to `count` never-delivered entries to `consumer`, registering
    /// them in the group's PEL and advancing the group cursor.
    ///
    /// Returns `None` if the group does not exist.
    pub fn read_group(
        &mut self,
        group_name: &str,
        consumer: &str,
        count: usize,
        now: u64,
    ) -> Option<Vec<StreamEntry>> {
        let group = self.consumer_groups.get_mut(group_name)?;
        group.get_or_create_consumer(consumer, now);

        let start = group.last_delivered_id.successor();
        let entries: Vec<StreamEntry> = self
            .entries
            .range(start..)
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect();

        for entry in &entries {
            group.add_pending(entry.id, consumer, now);
        }
        if let Some(last) = entries.last() {
            group.last_delivered_id = last.id;
            group.entries_read += entries.len() as u64;
        }

        Some(entries)
    }

    /// Claim up to `count` pending entries idle for at least `min_idle_ms`,
    /// oldest first. When `owner` is set only that consumer's entries are
    /// considered. PEL entries whose stream entry disappeared are dropped.
    ///
    /// Returns `None` if the group does not exist.
    pub fn claim_pending(
        &mut self,
        group_name: &str,
        consumer: &str,
        min_idle_ms: u64,
        owner: Option<&str>,
        count: usize,
        now: u64,
    ) -> Option<Vec<(StreamEntry, u64)>> {
        let group = self.consumer_groups.get_mut(group_name)?;

        let mut candidates = Vec::with_capacity(count);
        for id in group.idle_pending(min_idle_ms, owner, usize::MAX, now) {
            if candidates.len() >= count {
                break;
            }
            if self.entries.contains_key(&id) {
                candidates.push(id);
            } else {
                group.forget(&id);
            }
        }

        let claimed = group
            .claim(&candidates, consumer, now)
            .into_iter()
            .filter_map(|(id, delivery_count)| {
                self.entries.get(&id).map(|fields| {
                    (
                        StreamEntry {
                            id,
                            fields: fields.clone(),
                        },
                        delivery_count,
                    )
                })
            })
            .collect();

        Some(claimed)
    }
}
