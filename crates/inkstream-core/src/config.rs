//! Configuration module for inkstream
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all optional values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{InkstreamError, Result};
use crate::naming;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log store connection
    pub store: StoreConfig,

    /// Messaging service behaviour
    pub messaging: MessagingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            InkstreamError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| InkstreamError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.messaging.validate()?;
        Ok(())
    }
}

/// Which log store implementation backs the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, lost on restart
    #[default]
    Memory,

    /// Redis Streams
    Redis,
}

/// Log store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type
    pub backend: StoreBackend,

    /// Connection URL (`redis://host:port/db`)
    pub url: String,

    /// ACL username
    pub username: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Prefix applied to every topic key in the store
    pub key_prefix: String,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379/0".to_string(),
            username: None,
            password: None,
            key_prefix: "stream:".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Connection timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate the store settings
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Redis
            && !(self.url.starts_with("redis://") || self.url.starts_with("rediss://"))
        {
            return Err(InkstreamError::Config(format!(
                "Redis store URL must start with redis:// or rediss://, got '{}'",
                self.url
            )));
        }
        if self.key_prefix.contains(['*', '?', '[', ']']) {
            return Err(InkstreamError::Config(
                "Key prefix cannot contain glob characters".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(InkstreamError::Config(
                "Connect timeout cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Messaging service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Service identity; the consumer group name is derived from it
    pub service_name: String,

    /// Stable instance id. A random one is generated when unset.
    pub instance_id: Option<String>,

    /// Sleep between empty polls in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum entries claimed per poll
    pub batch_size: usize,

    /// Idle time after which another consumer's pending entry may be reclaimed
    pub pending_timeout_ms: u64,

    /// Deliveries allowed before a message is reported as a dead letter
    pub max_delivery_count: u64,

    /// Base delay for exponential retry backoff
    pub retry_base_ms: u64,

    /// Maximum retry backoff delay
    pub retry_max_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            service_name: "inkstream".to_string(),
            instance_id: None,
            poll_interval_ms: 100,
            batch_size: 10,
            pending_timeout_ms: 30_000,
            max_delivery_count: 5,
            retry_base_ms: 100,
            retry_max_ms: 30_000,
        }
    }
}

impl MessagingConfig {
    /// Sleep between empty polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Minimum idle time before reclaiming another consumer's entry
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    /// Base retry delay
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Retry delay cap
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// Validate the messaging settings
    pub fn validate(&self) -> Result<()> {
        naming::validate_name("service name", &self.service_name)
            .map_err(|e| InkstreamError::Config(e.to_string()))?;

        if let Some(id) = &self.instance_id {
            naming::validate_name("instance id", id)
                .map_err(|e| InkstreamError::Config(e.to_string()))?;
        }

        if self.poll_interval_ms == 0 {
            return Err(InkstreamError::Config(
                "Poll interval cannot be 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(InkstreamError::Config("Batch size cannot be 0".to_string()));
        }

        if self.max_delivery_count == 0 {
            return Err(InkstreamError::Config(
                "Max delivery count cannot be 0".to_string(),
            ));
        }

        if self.retry_base_ms > self.retry_max_ms {
            return Err(InkstreamError::Config(format!(
                "Retry base ({}ms) cannot exceed retry max ({}ms)",
                self.retry_base_ms, self.retry_max_ms
            )));
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}
