//! Shared test utilities for inkstream integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use inkstream::config::MessagingConfig;
use inkstream::storage::{ClaimFilter, DeliveredEntry, PendingEntry, StreamEntry};
use inkstream::{
    HandlerContext, HandlerResult, InkstreamError, LogStore, MemoryLogStore, Message,
    MessageHandler, MessagingService, QueueClient, Result, StreamEntryId,
};

// ============================================================================
// Store helpers
// ============================================================================

/// Queue client over a fresh in-memory store
#[allow(dead_code)]
pub fn new_queue() -> QueueClient {
    QueueClient::new(Arc::new(MemoryLogStore::new()))
}

/// Single-field entry with `body = value`
#[allow(dead_code)]
pub fn body(value: &str) -> Vec<(Bytes, Bytes)> {
    vec![(Bytes::from_static(b"body"), Bytes::from(value.to_string()))]
}

/// In-memory store whose first `read_group` calls fail as if the backend
/// were unreachable
#[allow(dead_code)]
pub struct FlakyStore {
    inner: MemoryLogStore,
    read_failures_left: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn failing_reads(failures: usize) -> Self {
        Self {
            inner: MemoryLogStore::new(),
            read_failures_left: AtomicUsize::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.read_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn append(&self, topic: &str, fields: Vec<(Bytes, Bytes)>) -> Result<StreamEntryId> {
        self.inner.append(topic, fields).await
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<bool> {
        self.inner.create_group(topic, group).await
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        if self.take_failure() {
            return Err(InkstreamError::StoreUnavailable("connection refused".into()));
        }
        self.inner.read_group(topic, group, consumer, count).await
    }

    async fn claim_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        filter: &ClaimFilter,
        count: usize,
    ) -> Result<Vec<DeliveredEntry>> {
        self.inner
            .claim_pending(topic, group, consumer, filter, count)
            .await
    }

    async fn pending(&self, topic: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        self.inner.pending(topic, group, count).await
    }

    async fn ack(&self, topic: &str, group: &str, ids: &[StreamEntryId]) -> Result<u64> {
        self.inner.ack(topic, group, ids).await
    }

    async fn delete(&self, topic: &str) -> Result<bool> {
        self.inner.delete(topic).await
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.inner.list_topics().await
    }

    async fn len(&self, topic: &str) -> Result<u64> {
        self.inner.len(topic).await
    }

    async fn range(&self, topic: &str, count: usize) -> Result<Vec<StreamEntry>> {
        self.inner.range(topic, count).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

// ============================================================================
// Service helpers
// ============================================================================

/// Messaging settings with millisecond-scale timings so loops turn quickly
#[allow(dead_code)]
pub fn fast_config(service: &str, instance: &str) -> MessagingConfig {
    MessagingConfig {
        service_name: service.to_string(),
        instance_id: Some(instance.to_string()),
        poll_interval_ms: 5,
        batch_size: 10,
        pending_timeout_ms: 50,
        max_delivery_count: 3,
        retry_base_ms: 5,
        retry_max_ms: 20,
    }
}

/// Service instance sharing `queue`'s store
#[allow(dead_code)]
pub fn new_service(queue: &QueueClient, service: &str, instance: &str) -> MessagingService {
    MessagingService::new(queue.clone(), fast_config(service, instance))
        .expect("valid test config")
}

/// Poll `check` until it returns true or `timeout` elapses
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// One recorded handler invocation
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub id: StreamEntryId,
    pub body: Bytes,
    pub consumer: String,
    pub delivery_count: u64,
}

/// Records every message it sees and fails the first `fail_first` calls
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingHandler {
    pub deliveries: Mutex<Vec<Delivery>>,
    pub fail_first: usize,
    pub always_fail: bool,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Default::default()
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Default::default()
        })
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn snapshot(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, ctx: HandlerContext, message: Message) -> HandlerResult {
        let call = {
            let mut deliveries = self.deliveries.lock();
            deliveries.push(Delivery {
                id: message.id.unwrap_or(StreamEntryId::MIN),
                body: message.body.clone(),
                consumer: ctx.consumer.clone(),
                delivery_count: ctx.delivery_count,
            });
            deliveries.len()
        };
        if self.always_fail || call <= self.fail_first {
            return Err(format!("induced failure #{call}").into());
        }
        Ok(())
    }
}
