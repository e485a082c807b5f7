//! Reply parsers for stream commands
//!
//! Replies are accepted in both RESP2 (arrays) and RESP3 (maps) shapes.

use std::time::Duration;

use bytes::Bytes;
use redis::Value;

use inkstream_core::error::{InkstreamError, Result};
use inkstream_core::storage::{PendingEntry, StreamEntry, StreamEntryId};

fn invalid(what: &str, value: &Value) -> InkstreamError {
    InkstreamError::Store(format!("unexpected {what} reply: {value:?}"))
}

pub(crate) fn value_to_string(value: &Value) -> Result<String> {
    match value {
        Value::BulkString(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Ok(s.clone()),
        Value::VerbatimString { text, .. } => Ok(text.clone()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(invalid("string", other)),
    }
}

fn value_to_bytes(value: Value) -> Result<Bytes> {
    match value {
        Value::BulkString(bytes) => Ok(Bytes::from(bytes)),
        Value::SimpleString(s) => Ok(Bytes::from(s)),
        Value::Int(i) => Ok(Bytes::from(i.to_string())),
        other => Err(invalid("field", &other)),
    }
}

pub(crate) fn value_to_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).map_err(|_| invalid("integer", value)),
        Value::BulkString(_) | Value::SimpleString(_) => value_to_string(value)?
            .parse()
            .map_err(|_| invalid("integer", value)),
        other => Err(invalid("integer", other)),
    }
}

pub(crate) fn parse_id(value: &Value) -> Result<StreamEntryId> {
    let s = value_to_string(value)?;
    StreamEntryId::parse(&s).ok_or_else(|| InkstreamError::Store(format!("invalid stream id '{s}'")))
}

/// One `[id, [field, value, ...]]` entry. Returns `None` for entries whose
/// fields are nil, which Redis reports for IDs deleted from the stream while
/// still pending.
fn parse_entry(value: Value) -> Result<Option<StreamEntry>> {
    let mut parts = match value {
        Value::Array(parts) => parts,
        other => return Err(invalid("entry", &other)),
    };
    if parts.len() != 2 {
        return Err(InkstreamError::Store(format!(
            "stream entry has {} parts",
            parts.len()
        )));
    }
    let raw_fields = parts.pop().unwrap_or(Value::Nil);
    let id = parse_id(&parts[0])?;

    let flat = match raw_fields {
        Value::Nil => return Ok(None),
        Value::Array(flat) => flat,
        Value::Map(pairs) => pairs.into_iter().flat_map(|(k, v)| [k, v]).collect(),
        other => return Err(invalid("entry fields", &other)),
    };

    let mut fields = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
        fields.push((value_to_bytes(field)?, value_to_bytes(val)?));
    }
    Ok(Some(StreamEntry { id, fields }))
}

/// XRANGE / XCLAIM reply: a list of entries
pub(crate) fn parse_entries(value: Value) -> Result<Vec<StreamEntry>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                if let Some(entry) = parse_entry(item)? {
                    entries.push(entry);
                }
            }
            Ok(entries)
        }
        other => Err(invalid("entry list", &other)),
    }
}

/// XREADGROUP reply for a single stream: `[[key, entries]]`, a map
/// `{key: entries}`, or nil when nothing is available
pub(crate) fn parse_read_group(value: Value) -> Result<Vec<StreamEntry>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(streams) => match streams.into_iter().next() {
            Some(Value::Array(mut pair)) if pair.len() == 2 => {
                parse_entries(pair.pop().unwrap_or(Value::Nil))
            }
            Some(other) => Err(invalid("stream", &other)),
            None => Ok(Vec::new()),
        },
        Value::Map(streams) => match streams.into_iter().next() {
            Some((_, entries)) => parse_entries(entries),
            None => Ok(Vec::new()),
        },
        other => Err(invalid("XREADGROUP", &other)),
    }
}

/// XPENDING extended reply: `[[id, consumer, idle_ms, deliveries], ...]`
pub(crate) fn parse_pending(value: Value) -> Result<Vec<PendingEntry>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(invalid("XPENDING", &other)),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Array(parts) if parts.len() == 4 => Ok(PendingEntry {
                id: parse_id(&parts[0])?,
                consumer: value_to_string(&parts[1])?,
                idle: Duration::from_millis(value_to_u64(&parts[2])?),
                delivery_count: value_to_u64(&parts[3])?,
            }),
            other => Err(invalid("pending entry", &other)),
        })
        .collect()
}

/// SCAN reply: `[cursor, [key, ...]]`
pub(crate) fn parse_scan(value: Value) -> Result<(u64, Vec<String>)> {
    let mut parts = match value {
        Value::Array(parts) => parts,
        other => return Err(invalid("SCAN", &other)),
    };
    if parts.len() != 2 {
        return Err(InkstreamError::Store("SCAN reply must have 2 parts".into()));
    }
    let keys = match parts.pop().unwrap_or(Value::Nil) {
        Value::Array(keys) => keys
            .iter()
            .map(value_to_string)
            .collect::<Result<Vec<_>>>()?,
        Value::Nil => Vec::new(),
        other => return Err(invalid("SCAN keys", &other)),
    };
    let cursor = value_to_u64(&parts[0])?;
    Ok((cursor, keys))
}
