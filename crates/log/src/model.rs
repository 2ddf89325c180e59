//! Data types shared by the log components.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An immutable log entry.
///
/// Serialized as the two-element array `[offset, value]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, i64)", into = "(u64, i64)")]
pub struct Entry {
    /// Zero-based position of the entry within its key's log.
    pub offset: u64,

    /// The payload.
    pub value: i64,
}

impl Entry {
    /// Creates a new entry.
    #[must_use]
    pub const fn new(offset: u64, value: i64) -> Self {
        Self { offset, value }
    }
}

impl From<(u64, i64)> for Entry {
    fn from((offset, value): (u64, i64)) -> Self {
        Self { offset, value }
    }
}

impl From<Entry> for (u64, i64) {
    fn from(entry: Entry) -> Self {
        (entry.offset, entry.value)
    }
}

/// Rejects topic keys that cannot name a log.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::MalformedRequest("topic key must not be empty".into()));
    }

    Ok(())
}

/// Converts an offset to its stored representation.
pub fn offset_to_stored(key: &str, offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| {
        Error::MalformedRequest(format!("offset {offset} for `{key}` is out of range"))
    })
}

/// Converts a stored counter or marker back to an offset.
pub fn offset_from_stored(key: &str, stored: i64) -> Result<u64> {
    u64::try_from(stored).map_err(|_| Error::InvariantViolation {
        key: key.to_string(),
        reason: format!("stored offset {stored} is negative"),
    })
}
