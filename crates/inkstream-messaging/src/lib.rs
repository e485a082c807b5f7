#![forbid(unsafe_code)]
//! # inkstream-messaging
//!
//! Publish/subscribe on top of an inkstream log store.
//!
//! - [`QueueClient`]: single-call publish, poll, claim and ack primitives
//! - [`MessagingService`]: topic lifecycle plus managed subscriptions with
//!   retry, redelivery and dead-letter reporting
//! - [`DelayedScheduler`]: in-process timers behind `publish_delayed`
//! - [`NotificationConsumer`]: a consumer of the `notifications` topic
//!
//! Delivery is at-least-once. A handler that returns `Ok` acknowledges its
//! message; an error leaves it pending so it is retried with exponential
//! backoff until the max delivery count is exceeded.

pub mod dispatch;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod notification;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use dispatch::SubscriptionState;
pub use handler::{
    handler_fn, DeadLetterHandler, HandlerContext, HandlerError, HandlerResult, MessageHandler,
};
pub use message::Message;
pub use metrics::{MessagingMetrics, MetricsSnapshot};
pub use notification::{NotificationConsumer, NotificationEvent, NotificationSender};
pub use queue::QueueClient;
pub use retry::RetryPolicy;
pub use scheduler::{DelayedId, DelayedScheduler};
pub use service::{MessagingService, MessagingServiceBuilder};
