//! Error types for inkstream
//!
//! This module defines the error taxonomy shared by the log store, the queue
//! client and the messaging service. Uses `thiserror` for ergonomic error
//! definitions.
//!
//! "No data" is never represented as an error: an empty poll returns an empty
//! vector. Callers can therefore tell "nothing to do" apart from "something is
//! broken" by matching on the `Result` alone.

use std::io;
use thiserror::Error;

/// Main error type for inkstream operations
#[derive(Error, Debug)]
pub enum InkstreamError {
    /// Topic, group or consumer name rejected before reaching the store
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Invalid argument value or format
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The consumer group (or the topic holding it) does not exist
    #[error("NOGROUP No such consumer group '{group}' for topic '{topic}'")]
    GroupNotFound {
        /// Topic the group was looked up on
        topic: String,
        /// Group name
        group: String,
    },

    /// The log store could not be reached or refused the operation transiently
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The log store answered with something we could not interpret
    #[error("Store error: {0}")]
    Store(String),

    /// A store operation did not complete in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Message body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A subscription for this topic is already running on this service
    #[error("Already subscribed to topic '{0}'")]
    AlreadySubscribed(String),

    /// The messaging service has been shut down
    #[error("Messaging service is stopped")]
    ServiceStopped,

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for inkstream operations
pub type Result<T> = std::result::Result<T, InkstreamError>;

impl InkstreamError {
    /// Returns true if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InkstreamError::StoreUnavailable(_) | InkstreamError::Timeout(_) | InkstreamError::Io(_)
        )
    }

    /// Returns true for errors raised synchronously from bad input or settings.
    /// These are never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            InkstreamError::InvalidName(_)
                | InkstreamError::InvalidArgument(_)
                | InkstreamError::Config(_)
        )
    }

    /// Shorthand for building a [`InkstreamError::GroupNotFound`]
    pub fn group_not_found(topic: &str, group: &str) -> Self {
        InkstreamError::GroupNotFound {
            topic: topic.to_string(),
            group: group.to_string(),
        }
    }
}
