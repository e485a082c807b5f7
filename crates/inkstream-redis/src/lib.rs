#![forbid(unsafe_code)]
//! # inkstream-redis
//!
//! A [`LogStore`](inkstream_core::storage::LogStore) backed by Redis Streams.
//!
//! Each topic is a stream key `<prefix><topic>`. Consumer groups map to Redis
//! consumer groups created at `0` with `MKSTREAM`; `BUSYGROUP` replies are
//! treated as "already exists" and `NOGROUP` replies become
//! `GroupNotFound`. Claiming pending entries uses `XPENDING ... IDLE` (Redis
//! 6.2 or newer) followed by `XCLAIM`.

mod parse;
mod store;

pub use store::RedisLogStore;
