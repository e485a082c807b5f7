//! Messaging service
//!
//! Topic lifecycle, publishing, and managed subscriptions on top of a
//! [`QueueClient`]. Each service instance owns its subscription registry; there
//! is no process-wide state, so several services (or tests) can share one
//! store without interfering.
//!
//! # Identity
//!
//! All subscriptions of one service join the consumer group named after
//! `service_name`. The consumer name is `<service_name>-<instance id>`, so two
//! processes running the same service compete for messages while different
//! services each receive every message.
//!
//! # Example
//!
//! ```ignore
//! let service = MessagingService::builder(QueueClient::new(store))
//!     .config(config.messaging.clone())
//!     .build()?;
//!
//! service.subscribe("orders", handler_fn(|_ctx, msg| async move {
//!     process(msg).await
//! })).await?;
//!
//! service.publish_json("orders", &order).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use inkstream_core::config::MessagingConfig;
use inkstream_core::error::{InkstreamError, Result};
use inkstream_core::naming::{validate_consumer, validate_topic};
use inkstream_core::storage::{PendingEntry, StreamEntryId};

use crate::dispatch::{StateCell, SubscriptionState, Worker, WorkerSettings};
use crate::handler::{DeadLetterHandler, MessageHandler};
use crate::message::Message;
use crate::metrics::{MessagingMetrics, MetricsSnapshot};
use crate::queue::QueueClient;
use crate::retry::RetryPolicy;
use crate::scheduler::{DelayedId, DelayedScheduler};

/// A running subscription in the registry
struct Subscription {
    stop: watch::Sender<bool>,
    state: StateCell,
    handle: JoinHandle<()>,
}

struct ServiceInner {
    queue: QueueClient,
    config: MessagingConfig,
    group: String,
    consumer: String,
    policy: RetryPolicy,
    metrics: Arc<MessagingMetrics>,
    dead_letter: Option<Arc<dyn DeadLetterHandler>>,
    subscriptions: DashMap<String, Subscription>,
    scheduler: DelayedScheduler,
    stopped: AtomicBool,
}

/// Builder for [`MessagingService`]
pub struct MessagingServiceBuilder {
    queue: QueueClient,
    config: MessagingConfig,
    policy: Option<RetryPolicy>,
    dead_letter: Option<Arc<dyn DeadLetterHandler>>,
}

impl MessagingServiceBuilder {
    /// Messaging settings
    pub fn config(mut self, config: MessagingConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the retry policy derived from the settings
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Receive messages that exceeded the max delivery count
    pub fn dead_letter_handler(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.dead_letter = Some(handler);
        self
    }

    /// Validate settings and create the service
    pub fn build(self) -> Result<MessagingService> {
        self.config.validate()?;

        let group = self.config.service_name.clone();
        let instance = self
            .config
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let consumer = format!("{group}-{instance}");
        validate_consumer(&consumer).map_err(|e| InkstreamError::Config(e.to_string()))?;

        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));

        info!(%group, %consumer, "messaging service created");
        Ok(MessagingService {
            inner: Arc::new(ServiceInner {
                queue: self.queue,
                config: self.config,
                group,
                consumer,
                policy,
                metrics: Arc::new(MessagingMetrics::new()),
                dead_letter: self.dead_letter,
                subscriptions: DashMap::new(),
                scheduler: DelayedScheduler::new(),
                stopped: AtomicBool::new(false),
            }),
        })
    }
}

/// Topic lifecycle, publish and subscribe over a queue client.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct MessagingService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingService")
            .field("group", &self.inner.group)
            .field("consumer", &self.inner.consumer)
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

impl MessagingService {
    /// Start building a service over `queue`
    pub fn builder(queue: QueueClient) -> MessagingServiceBuilder {
        MessagingServiceBuilder {
            queue,
            config: MessagingConfig::default(),
            policy: None,
            dead_letter: None,
        }
    }

    /// Create a service with the given settings
    pub fn new(queue: QueueClient, config: MessagingConfig) -> Result<Self> {
        Self::builder(queue).config(config).build()
    }

    /// Consumer group used by every subscription of this service
    pub fn group_name(&self) -> &str {
        &self.inner.group
    }

    /// Consumer name of this instance
    pub fn consumer_name(&self) -> &str {
        &self.inner.consumer
    }

    /// Underlying queue client
    pub fn queue(&self) -> &QueueClient {
        &self.inner.queue
    }

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // -- Topic lifecycle ----------------------------------------------------

    /// Create `topic` together with this service's consumer group
    pub async fn create_topic(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        self.inner.queue.create_group(topic, &self.inner.group).await?;
        info!(topic, group = %self.inner.group, "topic created");
        Ok(())
    }

    /// Stop the local subscription on `topic`, then delete the topic
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        self.unsubscribe(topic).await?;
        self.inner.queue.delete_stream(topic).await?;
        info!(topic, "topic deleted");
        Ok(())
    }

    /// All existing topics
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.inner.queue.list_streams().await
    }

    // -- Publish -------------------------------------------------------------

    /// Append `message` to `topic` and return its ID
    pub async fn publish(&self, topic: &str, message: &Message) -> Result<StreamEntryId> {
        publish_with(&self.inner.queue, &self.inner.metrics, topic, message).await
    }

    /// Serialize `value` as JSON and publish it
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> Result<StreamEntryId> {
        let message = Message::json(value)?;
        self.publish(topic, &message).await
    }

    /// Publish `message` once `delay` has elapsed.
    ///
    /// The message is held in process memory until then. If the process exits
    /// first it is lost; `shutdown` logs how many were dropped. Must be called
    /// from within a tokio runtime, otherwise `Internal` is returned.
    pub fn publish_delayed(&self, topic: &str, message: Message, delay: Duration) -> Result<DelayedId> {
        self.ensure_running()?;
        validate_topic(topic)?;

        let queue = self.inner.queue.clone();
        let metrics = Arc::clone(&self.inner.metrics);
        let topic = topic.to_string();
        let id = self.inner.scheduler.schedule(delay, async move {
            if let Err(e) = publish_with(&queue, &metrics, &topic, &message).await {
                error!(%topic, error = %e, "delayed publish failed; message dropped");
            }
        })?;
        debug!(%id, delay_ms = delay.as_millis() as u64, "delayed publish scheduled");
        Ok(id)
    }

    /// Cancel a delayed publish that has not fired yet
    pub fn cancel_delayed(&self, id: DelayedId) -> bool {
        self.inner.scheduler.cancel(id)
    }

    /// Delayed publishes waiting for their timer
    pub fn delayed_pending(&self) -> usize {
        self.inner.scheduler.pending()
    }

    // -- Subscribe -----------------------------------------------------------

    /// Ensure the service group exists on `topic` and start a dispatch loop
    /// that hands each message to `handler`.
    pub async fn subscribe<H>(&self, topic: &str, handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        self.ensure_running()?;
        validate_topic(topic)?;
        if self.inner.subscriptions.contains_key(topic) {
            return Err(InkstreamError::AlreadySubscribed(topic.to_string()));
        }

        self.inner.queue.create_group(topic, &self.inner.group).await?;

        match self.inner.subscriptions.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(InkstreamError::AlreadySubscribed(topic.to_string())),
            Entry::Vacant(slot) => {
                let (stop_tx, stop_rx) = watch::channel(false);
                let state: StateCell = Arc::new(RwLock::new(SubscriptionState::Polling));
                let worker = Worker {
                    settings: WorkerSettings {
                        topic: topic.to_string(),
                        group: self.inner.group.clone(),
                        consumer: self.inner.consumer.clone(),
                        batch_size: self.inner.config.batch_size,
                        poll_interval: self.inner.config.poll_interval(),
                        pending_timeout: self.inner.config.pending_timeout(),
                    },
                    queue: self.inner.queue.clone(),
                    policy: self.inner.policy.clone(),
                    metrics: Arc::clone(&self.inner.metrics),
                    handler: Arc::new(handler),
                    dead_letter: self.inner.dead_letter.clone(),
                    state: Arc::clone(&state),
                    stop: stop_rx,
                };
                let handle = tokio::spawn(worker.run());
                slot.insert(Subscription {
                    stop: stop_tx,
                    state,
                    handle,
                });
                Ok(())
            }
        }
    }

    /// Stop the dispatch loop for `topic` once its in-flight handler returns.
    /// The consumer group is kept, so a later subscribe resumes where this one
    /// left off.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        validate_topic(topic)?;
        let Some((_, subscription)) = self.inner.subscriptions.remove(topic) else {
            debug!(topic, "unsubscribe without an active subscription");
            return Ok(());
        };
        stop_subscription(topic, subscription).await;
        Ok(())
    }

    /// State of the subscription on `topic`; `Idle` when there is none
    pub fn subscription_state(&self, topic: &str) -> SubscriptionState {
        self.inner
            .subscriptions
            .get(topic)
            .map(|s| *s.state.read())
            .unwrap_or(SubscriptionState::Idle)
    }

    /// Topics with an active subscription, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .subscriptions
            .iter()
            .map(|e| e.key().clone())
            .collect();
        topics.sort();
        topics
    }

    // -- Inspection ----------------------------------------------------------

    /// First `count` messages on `topic`, in append order
    pub async fn list_messages(&self, topic: &str, count: usize) -> Result<Vec<Message>> {
        let entries = self.inner.queue.read_range(topic, count).await?;
        Ok(entries
            .into_iter()
            .map(|entry| Message::from_entry(topic, entry, 0))
            .collect())
    }

    /// Number of messages on `topic`
    pub async fn topic_len(&self, topic: &str) -> Result<u64> {
        self.inner.queue.len(topic).await
    }

    /// Un-acked deliveries of this service's group on `topic`
    pub async fn pending_messages(&self, topic: &str, count: usize) -> Result<Vec<PendingEntry>> {
        self.inner
            .queue
            .pending(topic, &self.inner.group, count)
            .await
    }

    /// Check the log store is reachable
    pub async fn health(&self) -> Result<()> {
        self.inner.queue.ping().await
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Stop every subscription, waiting for in-flight handlers, and drop
    /// delayed publishes that have not fired. Further subscribe and
    /// publish-delayed calls fail with `ServiceStopped`.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let topics: Vec<String> = self
            .inner
            .subscriptions
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for topic in topics {
            if let Some((_, subscription)) = self.inner.subscriptions.remove(&topic) {
                stop_subscription(&topic, subscription).await;
            }
        }

        let dropped = self.inner.scheduler.shutdown();
        if dropped > 0 {
            warn!(dropped, "delayed messages dropped at shutdown");
        }
        info!(group = %self.inner.group, consumer = %self.inner.consumer, "messaging service stopped");
    }

    /// Whether `shutdown` has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(InkstreamError::ServiceStopped);
        }
        Ok(())
    }
}

async fn publish_with(
    queue: &QueueClient,
    metrics: &MessagingMetrics,
    topic: &str,
    message: &Message,
) -> Result<StreamEntryId> {
    let id = queue.publish(topic, message.to_fields_at(Utc::now())).await?;
    metrics.record_published(topic);
    debug!(topic, %id, "message published");
    Ok(id)
}

async fn stop_subscription(topic: &str, subscription: Subscription) {
    *subscription.state.write() = SubscriptionState::Stopping;
    // The worker also exits when the sender is dropped
    let _ = subscription.stop.send(true);
    if let Err(e) = subscription.handle.await {
        error!(topic, error = %e, "dispatch task ended abnormally");
    }
}
