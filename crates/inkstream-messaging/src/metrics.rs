//! Messaging metrics
//!
//! Prometheus-compatible counters through the `metrics` crate, mirrored in
//! atomics so tests and health endpoints can read them without a recorder.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for publish, delivery and failure events
#[derive(Debug)]
pub struct MessagingMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    handler_failures: AtomicU64,
    redelivered: AtomicU64,
    dead_letters: AtomicU64,
    store_errors: AtomicU64,
}

impl MessagingMetrics {
    /// Create a new metrics instance and register descriptors
    pub fn new() -> Self {
        Self::register_descriptors();

        Self {
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            redelivered: AtomicU64::new(0),
            dead_letters: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    fn register_descriptors() {
        metrics::describe_counter!(
            "inkstream_messages_published_total",
            "Total messages appended to topics"
        );
        metrics::describe_counter!(
            "inkstream_messages_delivered_total",
            "Total messages handed to subscription handlers"
        );
        metrics::describe_counter!(
            "inkstream_messages_acked_total",
            "Total messages acknowledged"
        );
        metrics::describe_counter!(
            "inkstream_messages_handler_failures_total",
            "Total handler invocations that returned an error"
        );
        metrics::describe_counter!(
            "inkstream_messages_redelivered_total",
            "Total messages delivered more than once"
        );
        metrics::describe_counter!(
            "inkstream_messages_dead_letters_total",
            "Total messages that exceeded the max delivery count"
        );
        metrics::describe_counter!(
            "inkstream_store_errors_total",
            "Total log store errors seen by dispatch loops"
        );
    }

    /// Record a publish
    pub fn record_published(&self, topic: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("inkstream_messages_published_total", "topic" => topic.to_string())
            .increment(1);
    }

    /// Record a handler invocation; counts redelivery when `delivery_count > 1`
    pub fn record_delivered(&self, topic: &str, delivery_count: u64) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("inkstream_messages_delivered_total", "topic" => topic.to_string())
            .increment(1);
        if delivery_count > 1 {
            self.redelivered.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("inkstream_messages_redelivered_total", "topic" => topic.to_string())
                .increment(1);
        }
    }

    /// Record `n` acknowledged messages
    pub fn record_acked(&self, topic: &str, n: u64) {
        self.acked.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("inkstream_messages_acked_total", "topic" => topic.to_string())
            .increment(n);
    }

    /// Record a handler error
    pub fn record_handler_failure(&self, topic: &str) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "inkstream_messages_handler_failures_total",
            "topic" => topic.to_string()
        )
        .increment(1);
    }

    /// Record a dead-letter candidate
    pub fn record_dead_letter(&self, topic: &str) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("inkstream_messages_dead_letters_total", "topic" => topic.to_string())
            .increment(1);
    }

    /// Record a store error in a dispatch loop
    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("inkstream_store_errors_total").increment(1);
    }

    /// Return a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessagingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`MessagingMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub handler_failures: u64,
    pub redelivered: u64,
    pub dead_letters: u64,
    pub store_errors: u64,
}
