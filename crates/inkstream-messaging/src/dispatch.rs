//! Per-topic dispatch loop
//!
//! One worker task runs per subscription. Each iteration polls, in order:
//!
//! 1. this consumer's own pending entries (earlier handler failures),
//! 2. entries other consumers have held longer than the pending timeout,
//! 3. never-delivered entries.
//!
//! ```text
//! Idle ──► Polling ──► Dispatching ──ok──► Polling
//!             ▲             │
//!             │            err
//!             └─ RetryWait ◄┘
//! stop: Polling | Dispatching ──► Stopping ──► Idle
//! ```
//!
//! A stop request is only observed between handler invocations; a running
//! handler always completes. A panicking handler counts as a failed one.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use inkstream_core::error::{InkstreamError, Result};
use inkstream_core::storage::{DeliveredEntry, StreamEntryId};

use crate::handler::{
    DeadLetterHandler, HandlerContext, HandlerError, HandlerResult, MessageHandler,
};
use crate::message::Message;
use crate::metrics::MessagingMetrics;
use crate::queue::QueueClient;
use crate::retry::RetryPolicy;

/// Lifecycle state of one topic subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// No loop running
    Idle,
    /// Waiting for or fetching entries
    Polling,
    /// A handler is running
    Dispatching,
    /// Backing off after a handler failure
    RetryWait,
    /// Stop requested, finishing the in-flight handler
    Stopping,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::Polling => "polling",
            SubscriptionState::Dispatching => "dispatching",
            SubscriptionState::RetryWait => "retry_wait",
            SubscriptionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Shared cell the service reads and the worker writes
pub(crate) type StateCell = Arc<RwLock<SubscriptionState>>;

/// Static settings of one worker
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub topic: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub pending_timeout: Duration,
}

enum Outcome {
    Done,
    Failed(u64),
}

pub(crate) struct Worker {
    pub settings: WorkerSettings,
    pub queue: QueueClient,
    pub policy: RetryPolicy,
    pub metrics: Arc<MessagingMetrics>,
    pub handler: Arc<dyn MessageHandler>,
    pub dead_letter: Option<Arc<dyn DeadLetterHandler>>,
    pub state: StateCell,
    pub stop: watch::Receiver<bool>,
}

impl Worker {
    /// Run until a stop is requested
    pub async fn run(mut self) {
        let WorkerSettings {
            topic,
            group,
            consumer,
            ..
        } = self.settings.clone();
        info!(%topic, %group, %consumer, "subscription started");

        let mut store_failures: u64 = 0;
        'poll: while !self.stop_requested() {
            self.set_state(SubscriptionState::Polling);

            let batch = match self.poll().await {
                Ok(batch) => {
                    store_failures = 0;
                    batch
                }
                Err(e) => {
                    store_failures += 1;
                    self.metrics.record_store_error();
                    let delay = self.policy.backoff_delay(store_failures);
                    if matches!(e, InkstreamError::GroupNotFound { .. }) {
                        warn!(%topic, %group, "consumer group vanished; was the topic deleted?");
                    } else {
                        warn!(
                            %topic,
                            error = %e,
                            attempt = store_failures,
                            delay_ms = delay.as_millis() as u64,
                            "poll failed; backing off"
                        );
                    }
                    if self.pause(delay).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                if self.pause(self.settings.poll_interval).await {
                    break;
                }
                continue;
            }

            debug!(%topic, count = batch.len(), "dispatching batch");
            for delivered in batch {
                // Entries left in the batch stay in this consumer's PEL and
                // are picked up first on the next subscribe.
                if self.stop_requested() {
                    break 'poll;
                }
                if let Outcome::Failed(attempt) = self.dispatch(delivered).await {
                    self.set_state(SubscriptionState::RetryWait);
                    if self.pause(self.policy.backoff_delay(attempt)).await {
                        break 'poll;
                    }
                }
            }
        }

        self.set_state(SubscriptionState::Stopping);
        info!(%topic, %group, %consumer, "subscription stopped");
        self.set_state(SubscriptionState::Idle);
    }

    async fn poll(&self) -> Result<Vec<DeliveredEntry>> {
        let s = &self.settings;

        let own = self
            .queue
            .retry_own(&s.topic, &s.group, &s.consumer, s.batch_size)
            .await?;
        if !own.is_empty() {
            return Ok(own);
        }

        let stale = self
            .queue
            .claim_stale(&s.topic, &s.group, &s.consumer, s.pending_timeout, s.batch_size)
            .await?;
        if !stale.is_empty() {
            debug!(topic = %s.topic, count = stale.len(), "reclaimed stale entries");
            return Ok(stale);
        }

        self.queue
            .subscribe(&s.topic, &s.group, &s.consumer, s.batch_size)
            .await
    }

    async fn dispatch(&self, delivered: DeliveredEntry) -> Outcome {
        let s = &self.settings;
        let id = delivered.entry.id;
        let attempt = delivered.delivery_count;
        let message = Message::from_delivered(&s.topic, delivered);
        let ctx = HandlerContext::new(&s.topic, &s.group, &s.consumer, attempt, self.stop.clone());

        if self.policy.is_exhausted(attempt) {
            warn!(
                topic = %s.topic,
                %id,
                delivery_count = attempt,
                max = self.policy.max_delivery_count,
                "message exceeded max delivery count; dead-lettering"
            );
            if let Some(dead_letter) = &self.dead_letter {
                let dead_letter = Arc::clone(dead_letter);
                let handed_off =
                    isolated(async move { dead_letter.on_dead_letter(ctx, message).await }).await;
                if let Err(e) = handed_off {
                    error!(topic = %s.topic, %id, error = %e, "dead letter hand-off failed");
                    return Outcome::Failed(attempt);
                }
            }
            self.metrics.record_dead_letter(&s.topic);
            self.ack(id).await;
            return Outcome::Done;
        }

        self.set_state(SubscriptionState::Dispatching);
        self.metrics.record_delivered(&s.topic, attempt);

        let handler = Arc::clone(&self.handler);
        match isolated(async move { handler.handle(ctx, message).await }).await {
            Ok(()) => {
                self.ack(id).await;
                Outcome::Done
            }
            Err(e) => {
                self.metrics.record_handler_failure(&s.topic);
                warn!(
                    topic = %s.topic,
                    %id,
                    delivery_count = attempt,
                    error = %e,
                    "handler failed; message left pending"
                );
                Outcome::Failed(attempt)
            }
        }
    }

    async fn ack(&self, id: StreamEntryId) {
        let s = &self.settings;
        match self.queue.ack_many(&s.topic, &s.group, &[id]).await {
            Ok(n) => self.metrics.record_acked(&s.topic, n),
            // Still pending, so it will be redelivered
            Err(e) => warn!(topic = %s.topic, %id, error = %e, "ack failed"),
        }
    }

    /// Sleep for `delay` unless stopped first. Returns true when stopped.
    async fn pause(&mut self, delay: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        let sender_gone = tokio::select! {
            _ = tokio::time::sleep(delay) => return false,
            changed = self.stop.changed() => changed.is_err(),
        };
        sender_gone || self.stop_requested()
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.write() = state;
    }
}

/// Run a handler invocation on its own task so a panic surfaces as a handler
/// error instead of unwinding through the worker.
async fn isolated<F>(invocation: F) -> HandlerResult
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    match tokio::spawn(invocation).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HandlerError::from("handler panicked")),
        Err(e) => Err(HandlerError::from(e.to_string())),
    }
}
