//! Per-node mirror of each key's log.
//!
//! Every key gets its own lock, created on first use and never removed, so
//! polls and appends on different keys never contend. No lock is held while
//! a store call is in flight: reads snapshot the slots, fetch what is
//! missing, then install the results under a short write lock. Entries are
//! immutable, so installing a fetched value can never race with a
//! conflicting one.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use seqlog_kv::Kv;
use tracing::{debug, error};

use crate::entries::EntryStore;
use crate::error::{Error, Result};
use crate::model::Entry;

/// A cached log position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Not yet fetched from the entry store.
    Unknown,

    /// The entry's value. Final once set.
    Known(i64),
}

#[derive(Debug, Default)]
struct KeyLog {
    slots: Vec<Slot>,
}

impl KeyLog {
    fn install(&mut self, key: &str, offset: u64, value: i64) -> Result<()> {
        let index = usize::try_from(offset).map_err(|_| Error::InvariantViolation {
            key: key.to_string(),
            reason: format!("offset {offset} does not fit in memory"),
        })?;

        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::Unknown);
        }

        match self.slots[index] {
            Slot::Known(existing) if existing != value => {
                error!(key, offset, existing, value, "entry changed after being written");
                Err(Error::InvariantViolation {
                    key: key.to_string(),
                    reason: format!("offset {offset} holds {existing}, refusing {value}"),
                })
            }
            _ => {
                self.slots[index] = Slot::Known(value);
                Ok(())
            }
        }
    }
}

/// Per-key cache of fetched and produced entries.
#[derive(Debug, Default)]
pub struct LocalCache {
    logs: DashMap<String, Arc<RwLock<KeyLog>>>,
}

impl LocalCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, key: &str) -> Arc<RwLock<KeyLog>> {
        if let Some(shard) = self.logs.get(key) {
            return Arc::clone(&shard);
        }

        Arc::clone(&self.logs.entry(key.to_string()).or_default())
    }

    /// Number of slots cached for `key`, known or not.
    #[must_use]
    pub fn len(&self, key: &str) -> u64 {
        self.logs
            .get(key)
            .map_or(0, |shard| shard.read().slots.len() as u64)
    }

    /// Snapshot of the slots cached for `key`.
    #[must_use]
    pub fn slots(&self, key: &str) -> Vec<Slot> {
        self.logs
            .get(key)
            .map(|shard| shard.read().slots.clone())
            .unwrap_or_default()
    }

    /// Records a value this node wrote at `(key, offset)`.
    pub fn install(&self, key: &str, offset: u64, value: i64) -> Result<()> {
        self.shard(key).write().install(key, offset, value)
    }

    /// Backfills `key` from the current cache length up to `upto`
    /// (exclusive), stopping at the first offset the store does not hold.
    pub async fn extend<S: Kv, L: Kv>(
        &self,
        entries: &EntryStore<S, L>,
        key: &str,
        upto: u64,
    ) -> Result<()> {
        let shard = self.shard(key);
        let start = shard.read().slots.len() as u64;

        let mut fetched = Vec::new();
        let mut failure = None;
        for offset in start..upto {
            match entries.get(key, offset).await {
                Ok(Some(value)) => fetched.push((offset, value)),
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !fetched.is_empty() {
            debug!(key, start, count = fetched.len(), "backfilled cache");
            let mut log = shard.write();
            for (offset, value) in fetched {
                log.install(key, offset, value)?;
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Returns every entry from `from` to the end of the cached length,
    /// fetching unknown slots on demand.
    ///
    /// The range ends before the first unknown slot the store does not hold
    /// yet, so the result is always contiguous.
    pub async fn resolve_range<S: Kv, L: Kv>(
        &self,
        entries: &EntryStore<S, L>,
        key: &str,
        from: u64,
    ) -> Result<Vec<Entry>> {
        let shard = self.shard(key);
        let snapshot = {
            let log = shard.read();
            usize::try_from(from)
                .ok()
                .and_then(|start| log.slots.get(start..))
                .map(<[Slot]>::to_vec)
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(snapshot.len());
        let mut fetched = Vec::new();
        let mut failure = None;
        for (index, slot) in snapshot.into_iter().enumerate() {
            // Bounded by the cached length
            let offset = from + index as u64;
            match slot {
                Slot::Known(value) => resolved.push(Entry::new(offset, value)),
                Slot::Unknown => match entries.get(key, offset).await {
                    Ok(Some(value)) => {
                        fetched.push((offset, value));
                        resolved.push(Entry::new(offset, value));
                    }
                    Ok(None) => {
                        debug!(key, offset, "entry not written yet, ending range");
                        break;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },
            }
        }

        if !fetched.is_empty() {
            let mut log = shard.write();
            for (offset, value) in fetched {
                log.install(key, offset, value)?;
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(resolved),
        }
    }
}
