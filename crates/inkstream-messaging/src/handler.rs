//! Subscription handler contract

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::message::Message;

/// Error returned by a handler. Any error leaves the message un-acked.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Per-delivery context handed to handlers alongside the message
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Topic the message was read from
    pub topic: String,
    /// Consumer group that owns the delivery
    pub group: String,
    /// Consumer holding the message in the PEL
    pub consumer: String,
    /// Delivery attempts including this one
    pub delivery_count: u64,
    stop: watch::Receiver<bool>,
}

impl HandlerContext {
    pub(crate) fn new(
        topic: &str,
        group: &str,
        consumer: &str,
        delivery_count: u64,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            delivery_count,
            stop,
        }
    }

    /// True once unsubscribe or service shutdown has been requested.
    /// The running invocation is still allowed to finish.
    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Whether this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Processes messages delivered by a subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. `Ok` acknowledges it; `Err` leaves it pending for retry.
    async fn handle(&self, ctx: HandlerContext, message: Message) -> HandlerResult;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, ctx: HandlerContext, message: Message) -> HandlerResult {
        (**self).handle(ctx, message).await
    }
}

/// Receives messages that exceeded the max delivery count
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    /// Called once before the message is acked and dropped from the PEL.
    /// An error keeps the message pending so the hand-off is retried.
    async fn on_dead_letter(&self, ctx: HandlerContext, message: Message) -> HandlerResult;
}

/// Handler built from an async closure
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```ignore
/// service
///     .subscribe("orders", handler_fn(|_ctx, msg| async move {
///         println!("{:?}", msg.body);
///         Ok(())
///     }))
///     .await?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HandlerContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, message: Message) -> HandlerResult {
        (self.f)(ctx, message).await
    }
}
