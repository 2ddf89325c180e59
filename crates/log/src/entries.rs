//! Durable storage of individual log entries.

use seqlog_kv::Kv;
use tracing::{error, warn};

use crate::allocator::OffsetAllocator;
use crate::bounded::BoundedKv;
use crate::error::Result;

/// Persists `(key, offset) -> value` records.
///
/// Each slot is written once, by the node whose swap allocated the offset,
/// so a store that is only sequentially consistent per writer is enough.
#[derive(Clone, Debug)]
pub struct EntryStore<S: Kv, L: Kv> {
    entries: BoundedKv<S>,
    allocator: OffsetAllocator<L>,
    write_attempts: usize,
}

impl<S: Kv, L: Kv> EntryStore<S, L> {
    pub fn new(entries: BoundedKv<S>, allocator: OffsetAllocator<L>, write_attempts: usize) -> Self {
        Self {
            entries,
            allocator,
            write_attempts: write_attempts.max(1),
        }
    }

    /// Allocates an offset for `key` and persists `value` there.
    pub async fn append(&self, key: &str, value: i64) -> Result<u64> {
        let offset = self.allocator.allocate(key).await?;
        let entry_key = entry_key(key, offset);

        let mut attempt = 1;
        loop {
            match self.entries.write(&entry_key, value).await {
                Ok(()) => return Ok(offset),
                Err(e) if attempt < self.write_attempts => {
                    warn!(key, offset, attempt, error = %e, "entry write failed, rewriting");
                    attempt += 1;
                }
                Err(e) => {
                    // Until this slot is written, polls on the key stop short of it.
                    error!(key, offset, error = %e, "allocated offset left unwritten");
                    return Err(e);
                }
            }
        }
    }

    /// Reads the entry at `(key, offset)`.
    pub async fn get(&self, key: &str, offset: u64) -> Result<Option<i64>> {
        self.entries.read(&entry_key(key, offset)).await
    }
}

fn entry_key(key: &str, offset: u64) -> String {
    format!("{key}:{offset}")
}
