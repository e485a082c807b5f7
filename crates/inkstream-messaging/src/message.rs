//! Message envelope
//!
//! A message is stored on the log as a flat list of field/value pairs:
//!
//! | Field           | Content                              |
//! |-----------------|--------------------------------------|
//! | `body`          | opaque payload bytes                 |
//! | `enqueued_at`   | Unix milliseconds at publish time    |
//! | `header:<name>` | one field per header                 |
//!
//! Decoding is lenient: fields written by other producers that use a flat
//! key/value payload surface as headers.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use inkstream_core::error::{InkstreamError, Result};
use inkstream_core::storage::{DeliveredEntry, StreamEntry, StreamEntryId};

const BODY_FIELD: &str = "body";
const ENQUEUED_AT_FIELD: &str = "enqueued_at";
const HEADER_PREFIX: &str = "header:";

/// Content type header name
pub const CONTENT_TYPE: &str = "content-type";

/// Content type set by [`Message::json`]
pub const APPLICATION_JSON: &str = "application/json";

/// A message read from or about to be written to a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Log-assigned ID; `None` until published
    pub id: Option<StreamEntryId>,
    /// Topic the message was read from; empty until published
    pub topic: String,
    /// String headers
    pub headers: BTreeMap<String, String>,
    /// Opaque payload
    pub body: Bytes,
    /// Creation time until published; the append time once read back
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts including the current one; 0 for unpublished messages
    pub delivery_count: u64,
}

impl Message {
    /// Build a message from raw bytes
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            topic: String::new(),
            headers: BTreeMap::new(),
            body: body.into(),
            enqueued_at: Utc::now(),
            delivery_count: 0,
        }
    }

    /// Serialize `value` as JSON and tag the content type
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| InkstreamError::Serialization(e.to_string()))?;
        Ok(Self::new(body).with_header(CONTENT_TYPE, APPLICATION_JSON))
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Deserialize the body as JSON
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| InkstreamError::Serialization(e.to_string()))
    }

    /// Flatten into log fields, keeping `enqueued_at` as set on the message
    pub fn to_fields(&self) -> Vec<(Bytes, Bytes)> {
        self.to_fields_at(self.enqueued_at)
    }

    /// Flatten into log fields, recording `enqueued_at` as the enqueue time.
    /// Publishing passes the current time here.
    pub fn to_fields_at(&self, enqueued_at: DateTime<Utc>) -> Vec<(Bytes, Bytes)> {
        let mut fields = Vec::with_capacity(self.headers.len() + 2);
        fields.push((Bytes::from_static(BODY_FIELD.as_bytes()), self.body.clone()));
        fields.push((
            Bytes::from_static(ENQUEUED_AT_FIELD.as_bytes()),
            Bytes::from(enqueued_at.timestamp_millis().to_string()),
        ));
        for (name, value) in &self.headers {
            fields.push((
                Bytes::from(format!("{HEADER_PREFIX}{name}")),
                Bytes::from(value.clone()),
            ));
        }
        fields
    }

    /// Rebuild a message from a log entry
    pub fn from_entry(topic: &str, entry: StreamEntry, delivery_count: u64) -> Self {
        let mut headers = BTreeMap::new();
        let mut body = Bytes::new();
        // Entries from foreign producers carry no timestamp; the ID's
        // millisecond part is the append time.
        let mut enqueued_ms = entry.id.ms as i64;

        for (field, value) in entry.fields {
            let name = String::from_utf8_lossy(&field);
            if name == BODY_FIELD {
                body = value;
            } else if name == ENQUEUED_AT_FIELD {
                if let Some(ms) = std::str::from_utf8(&value)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                {
                    enqueued_ms = ms;
                }
            } else {
                let key = name.strip_prefix(HEADER_PREFIX).unwrap_or(name.as_ref()).to_string();
                headers.insert(key, String::from_utf8_lossy(&value).into_owned());
            }
        }

        Self {
            id: Some(entry.id),
            topic: topic.to_string(),
            headers,
            body,
            enqueued_at: Utc
                .timestamp_millis_opt(enqueued_ms)
                .single()
                .unwrap_or_else(Utc::now),
            delivery_count,
        }
    }

    /// Rebuild a message from a delivered entry
    pub fn from_delivered(topic: &str, delivered: DeliveredEntry) -> Self {
        Self::from_entry(topic, delivered.entry, delivered.delivery_count)
    }
}
