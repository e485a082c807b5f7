#![forbid(unsafe_code)]
//! # inkstream-core
//!
//! Core building blocks for inkstream: the error taxonomy, configuration,
//! logging bootstrap, name validation, and the append-only log store with
//! consumer groups that the queue layer is built on.

pub mod config;
pub mod error;
pub mod naming;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{InkstreamError, Result};
pub use storage::{LogStore, MemoryLogStore, StreamEntryId};
