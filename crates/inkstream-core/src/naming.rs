//! Topic, group and consumer name validation
//!
//! Names are checked before any store call so malformed input never reaches
//! the log store.

use crate::error::{InkstreamError, Result};

/// Longest accepted name, in bytes
pub const MAX_NAME_LEN: usize = 200;

/// Validate a name used as a topic, group or consumer identifier.
///
/// Accepts ASCII alphanumerics plus `-`, `_`, `.` and `:`.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(InkstreamError::InvalidName(format!("{kind} cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(InkstreamError::InvalidName(format!(
            "{kind} exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(InkstreamError::InvalidName(format!(
            "{kind} '{name}' contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// Validate a topic name
pub fn validate_topic(topic: &str) -> Result<()> {
    validate_name("topic", topic)
}

/// Validate a consumer group name
pub fn validate_group(group: &str) -> Result<()> {
    validate_name("group", group)
}

/// Validate a consumer name
pub fn validate_consumer(consumer: &str) -> Result<()> {
    validate_name("consumer", consumer)
}

#[inline]
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}
