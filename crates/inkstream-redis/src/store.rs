//! [`LogStore`] on Redis Streams

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{IntoConnectionInfo, RedisError, Value};
use tracing::{debug, info, trace};

use inkstream_core::config::StoreConfig;
use inkstream_core::error::{InkstreamError, Result};
use inkstream_core::storage::{
    ClaimFilter, DeliveredEntry, LogStore, PendingEntry, StreamEntry, StreamEntryId,
};

use crate::parse::{parse_entries, parse_id, parse_pending, parse_read_group, parse_scan, value_to_u64};

const SCAN_BATCH: usize = 256;

/// Map a driver error into the shared taxonomy
pub(crate) fn map_err(e: RedisError) -> InkstreamError {
    if e.is_timeout() {
        InkstreamError::StoreUnavailable(format!("timed out: {e}"))
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        InkstreamError::StoreUnavailable(e.to_string())
    } else {
        InkstreamError::Store(e.to_string())
    }
}

fn is_code(e: &RedisError, code: &str) -> bool {
    e.code() == Some(code)
}

/// Topics stored as Redis stream keys under a common prefix.
///
/// Uses one multiplexed connection; clones of it are handed to each command
/// so the store can be shared freely between tasks.
#[derive(Clone)]
pub struct RedisLogStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl std::fmt::Debug for RedisLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLogStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisLogStore {
    /// Connect using store settings. Credentials in the config override the URL.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| InkstreamError::Config(format!("invalid store URL: {e}")))?;
        if let Some(username) = &config.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client = redis::Client::open(info)
            .map_err(|e| InkstreamError::Config(format!("invalid store URL: {e}")))?;

        let conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| InkstreamError::Timeout(config.connect_timeout_ms))?
        .map_err(|e| InkstreamError::StoreUnavailable(format!("failed to connect: {e}")))?;

        info!(prefix = %config.key_prefix, "connected to redis log store");
        Ok(Self::from_connection(conn, config.key_prefix.clone()))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Key prefix applied to topic names
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    async fn query(&self, cmd: &redis::Cmd) -> std::result::Result<Value, RedisError> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await
    }

    async fn claim_ids(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        pending: &[PendingEntry],
    ) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(key).arg(group).arg(consumer).arg(min_idle_ms);
        for p in pending {
            cmd.arg(p.id.to_string());
        }
        let reply = self.query(&cmd).await.map_err(map_err)?;
        parse_entries(reply)
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn append(&self, topic: &str, fields: Vec<(Bytes, Bytes)>) -> Result<StreamEntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.key(topic)).arg("*");
        for (field, value) in &fields {
            cmd.arg(field.as_ref()).arg(value.as_ref());
        }
        let reply = self.query(&cmd).await.map_err(map_err)?;
        let id = parse_id(&reply)?;
        trace!(topic, %id, "XADD");
        Ok(id)
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<bool> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(self.key(topic))
            .arg(group)
            .arg("0")
            .arg("MKSTREAM");
        match self.query(&cmd).await {
            Ok(_) => Ok(true),
            Err(e) if is_code(&e, "BUSYGROUP") => {
                debug!(topic, group, "consumer group already exists");
                Ok(false)
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(self.key(topic))
            .arg(">");
        let reply = match self.query(&cmd).await {
            Ok(reply) => reply,
            Err(e) if is_code(&e, "NOGROUP") => {
                return Err(InkstreamError::group_not_found(topic, group))
            }
            Err(e) => return Err(map_err(e)),
        };

        Ok(parse_read_group(reply)?
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
        let key = self.key(topic);
        let min_idle_ms = filter.min_idle.as_millis() as u64;

        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(&key)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count);
        if let Some(owner) = &filter.owner {
            cmd.arg(owner);
        }
        let candidates = match self.query(&cmd).await {
            Ok(reply) => parse_pending(reply)?,
            Err(e) if is_code(&e, "NOGROUP") => {
                return Err(InkstreamError::group_not_found(topic, group))
            }
            Err(e) => return Err(map_err(e)),
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks the idle time, so an entry another consumer took
        // between the two calls is skipped rather than stolen.
        let claimed = self
            .claim_ids(&key, group, consumer, min_idle_ms, &candidates)
            .await?;

        Ok(claimed
            .into_iter()
            .map(|entry| {
                let previous = candidates
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map(|p| p.delivery_count)
                    .unwrap_or(0);
                DeliveredEntry {
                    entry,
                    delivery_count: previous + 1,
                }
            })
            .collect())
    }

    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(self.key(topic))
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count);
        match self.query(&cmd).await {
            Ok(reply) => parse_pending(reply),
            Err(e) if is_code(&e, "NOGROUP") => Err(InkstreamError::group_not_found(topic, group)),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn ack(&self, topic: &str, group: &str, ids: &[StreamEntryId]) -> Result<u64> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(self.key(topic)).arg(group);
        for id in ids {
            cmd.arg(id.to_string());
        }
        match self.query(&cmd).await {
            Ok(reply) => value_to_u64(&reply),
            Err(e) if is_code(&e, "NOGROUP") => Ok(0),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn delete(&self, topic: &str) -> Result<bool> {
        let reply = self
            .query(redis::cmd("DEL").arg(self.key(topic)))
            .await
            .map_err(map_err)?;
        Ok(value_to_u64(&reply)? > 0)
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.prefix);
        let mut topics = Vec::new();
        let mut cursor = 0u64;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .arg("TYPE")
                .arg("stream");
            let (next, keys) = parse_scan(self.query(&cmd).await.map_err(map_err)?)?;
            topics.extend(
                keys.into_iter()
                    .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string)),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        topics.sort();
        topics.dedup();
        Ok(topics)
    }

    async fn len(&self, topic: &str) -> Result<u64> {
        let reply = self
            .query(redis::cmd("XLEN").arg(self.key(topic)))
            .await
            .map_err(map_err)?;
        value_to_u64(&reply)
    }

    async fn range(&self, topic: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XRANGE");
        cmd.arg(self.key(topic)).arg("-").arg("+").arg("COUNT").arg(count);
        parse_entries(self.query(&cmd).await.map_err(map_err)?)
    }

    async fn ping(&self) -> Result<()> {
        self.query(&redis::cmd("PING")).await.map_err(map_err)?;
        Ok(())
    }
}
