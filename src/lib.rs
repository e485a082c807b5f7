//! # Inkstream
//!
//! A durable, ordered, at-least-once message queue built on append-only
//! streams with competing consumer groups, in the style of Redis Streams.
//!
//! This is the top-level crate that re-exports the workspace crates for a
//! unified API. Individual crates can also be used on their own.
//!
//! ## Crate Organization
//!
//! | Crate | Description |
//! |-------|-------------|
//! | [`inkstream-core`] | Errors, configuration, logging, stream structures, `LogStore`, in-memory store |
//! | [`inkstream-messaging`] | Queue client, messaging service, dispatch loop, delayed publish, notifications |
//! | [`inkstream-redis`] | Redis Streams log store (feature `redis`) |
//!
//! ## Quick Start
//!
//! ```ignore
//! let config = inkstream::Config::from_file(Path::new("inkstream.toml"))?;
//! inkstream::telemetry::init_logging(&config.logging)?;
//!
//! let service = inkstream::connect(&config).await?;
//! service
//!     .subscribe("orders", inkstream::handler_fn(|_ctx, msg| async move {
//!         tracing::info!(len = msg.body.len(), "order received");
//!         Ok(())
//!     }))
//!     .await?;
//! service.publish("orders", &inkstream::Message::new("hello")).await?;
//! ```

use std::sync::Arc;

// ── Re-exports from inkstream-core ───────────────────────────────────────────

pub use inkstream_core::config;
pub use inkstream_core::error;
pub use inkstream_core::naming;
pub use inkstream_core::storage;
pub use inkstream_core::telemetry;

pub use inkstream_core::{Config, InkstreamError, LogStore, MemoryLogStore, Result, StreamEntryId};

// ── Re-exports from inkstream-messaging ──────────────────────────────────────

pub use inkstream_messaging::{dispatch, handler, message, notification, queue, retry, scheduler, service};

pub use inkstream_messaging::{
    handler_fn, DeadLetterHandler, DelayedId, HandlerContext, HandlerError, HandlerResult,
    Message, MessageHandler, MessagingService, MessagingServiceBuilder, MetricsSnapshot,
    NotificationConsumer, NotificationEvent, NotificationSender, QueueClient, RetryPolicy,
    SubscriptionState,
};

// ── Re-exports from inkstream-redis ──────────────────────────────────────────

#[cfg(feature = "redis")]
pub use inkstream_redis::RedisLogStore;

use inkstream_core::config::{StoreBackend, StoreConfig};

/// Open the log store selected by `config.backend`
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn LogStore>> {
    config.validate()?;
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryLogStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisLogStore::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(InkstreamError::Config(
            "redis backend requires the `redis` feature".to_string(),
        )),
    }
}

/// Open the configured store and build a messaging service over it
pub async fn connect(config: &Config) -> Result<MessagingService> {
    config.validate()?;
    let store = open_store(&config.store).await?;
    MessagingService::new(QueueClient::new(store), config.messaging.clone())
}
