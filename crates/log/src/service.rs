//! The log service: append, poll, commit and list-committed over a pair of
//! external stores.

use std::collections::BTreeMap;
use std::fmt::Debug;

use futures::future::join_all;
use seqlog_kv::{Consistency, Kv, Kv1};
use tracing::{instrument, warn};

use crate::allocator::OffsetAllocator;
use crate::bounded::BoundedKv;
use crate::cache::LocalCache;
use crate::commits::CommitTracker;
use crate::config::LogServiceConfig;
use crate::entries::EntryStore;
use crate::error::{Error, Result};
use crate::model::{Entry, validate_key};

const ENTRIES_SCOPE: &str = "entries";
const OFFSETS_SCOPE: &str = "offsets";
const COMMITTED_SCOPE: &str = "committed";

/// One node's view of the replicated log.
///
/// Entries go to `S`, which only needs per-writer sequential consistency.
/// Offset counters and commit markers go to `L`, which must be linearizable.
/// Several services sharing the same stores behave as a cluster: allocation
/// is coordinated through the stores, and each service keeps its own cache.
pub struct LogService<S: Kv1, L: Kv1> {
    entries: EntryStore<S::Scoped, L::Scoped>,
    commits: CommitTracker<L::Scoped>,
    cache: LocalCache,
    lookahead: u64,
}

impl<S: Kv1, L: Kv1> LogService<S, L> {
    /// Creates a new `LogService`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLinearizable`] if `counters` does not provide
    /// linearizable compare-and-swap.
    pub fn new(
        entries: S,
        counters: L,
        LogServiceConfig {
            lookahead,
            operation_timeout,
            max_cas_attempts,
            conflict_backoff,
            entry_write_attempts,
        }: LogServiceConfig,
    ) -> Result<Self> {
        if counters.consistency() != Consistency::Linearizable {
            return Err(Error::NotLinearizable { store: "counter" });
        }

        let allocator = OffsetAllocator::new(
            BoundedKv::new(counters.scope(OFFSETS_SCOPE), operation_timeout),
            max_cas_attempts,
            conflict_backoff,
        );
        let commits = CommitTracker::new(
            BoundedKv::new(counters.scope(COMMITTED_SCOPE), operation_timeout),
            max_cas_attempts,
            conflict_backoff,
        );
        let entries = EntryStore::new(
            BoundedKv::new(entries.scope(ENTRIES_SCOPE), operation_timeout),
            allocator,
            entry_write_attempts,
        );

        Ok(Self {
            entries,
            commits,
            cache: LocalCache::new(),
            lookahead: lookahead.max(1),
        })
    }

    /// This node's cache.
    pub const fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Appends `value` to the log for `key`, returning its offset.
    ///
    /// # Errors
    ///
    /// Fails if the key is empty or a store call fails; a failed append is
    /// never reported as successful.
    #[instrument(skip(self))]
    pub async fn append(&self, key: &str, value: i64) -> Result<u64> {
        validate_key(key)?;

        let offset = self.entries.append(key, value).await?;
        self.cache.install(key, offset, value)?;

        Ok(offset)
    }

    /// Returns, for every requested key, the contiguous entries starting at
    /// the requested offset. Keys with nothing at or beyond their offset are
    /// omitted.
    ///
    /// # Errors
    ///
    /// Rejects the request if any key is empty. Otherwise every key is
    /// processed; a key that fails transiently is logged and omitted.
    /// [`Error::Batch`] is returned when every key failed or any key hit an
    /// invariant violation.
    #[instrument(skip(self, offsets), fields(keys = offsets.len()))]
    pub async fn poll(
        &self,
        offsets: &BTreeMap<String, u64>,
    ) -> Result<BTreeMap<String, Vec<Entry>>> {
        for key in offsets.keys() {
            validate_key(key)?;
        }

        let results = join_all(offsets.iter().map(|(key, &from)| async move {
            (key, self.poll_key(key, from).await)
        }))
        .await;

        let mut messages = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (key, result) in results {
            match result {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    messages.insert(key.clone(), entries);
                }
                Err(e) => {
                    failures.insert(key.clone(), e);
                }
            }
        }

        if failures.is_empty() {
            return Ok(messages);
        }

        // A transiently failed key is omitted, same as a key with nothing new.
        if failures.len() < offsets.len() && failures.values().all(Error::is_transient) {
            for (key, error) in &failures {
                warn!(key, %error, "poll failed for key, omitting it");
            }
            return Ok(messages);
        }

        warn!(failed = failures.len(), "poll failed");
        Err(Error::Batch { failures })
    }

    /// Raises the commit marker of every key to its requested offset.
    ///
    /// # Errors
    ///
    /// Rejects the request if any key is empty. Otherwise every key is
    /// processed; keys that failed are reported in [`Error::Batch`].
    #[instrument(skip(self, offsets), fields(keys = offsets.len()))]
    pub async fn commit(&self, offsets: &BTreeMap<String, u64>) -> Result<()> {
        for key in offsets.keys() {
            validate_key(key)?;
        }

        let results = join_all(
            offsets
                .iter()
                .map(|(key, &offset)| async move { (key, self.commits.commit(key, offset).await) }),
        )
        .await;

        let failures: BTreeMap<_, _> = results
            .into_iter()
            .filter_map(|(key, result)| result.err().map(|e| (key.clone(), e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failed = failures.len(), "commit failed for some keys");
            Err(Error::Batch { failures })
        }
    }

    /// Returns the commit marker of every requested key that has one.
    ///
    /// # Errors
    ///
    /// Rejects the request if any key is empty; reports keys whose marker
    /// could not be read in [`Error::Batch`].
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn list_committed(&self, keys: &[String]) -> Result<BTreeMap<String, u64>> {
        for key in keys {
            validate_key(key)?;
        }

        let results = join_all(
            keys.iter()
                .map(|key| async move { (key, self.commits.committed(key).await) }),
        )
        .await;

        let mut offsets = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (key, result) in results {
            match result {
                Ok(Some(offset)) => {
                    offsets.insert(key.clone(), offset);
                }
                Ok(None) => {}
                Err(e) => {
                    failures.insert(key.clone(), e);
                }
            }
        }

        if failures.is_empty() {
            Ok(offsets)
        } else {
            Err(Error::Batch { failures })
        }
    }

    async fn poll_key(&self, key: &str, from: u64) -> Result<Vec<Entry>> {
        self.cache
            .extend(&self.entries, key, from.saturating_add(self.lookahead))
            .await?;

        self.cache.resolve_range(&self.entries, key, from).await
    }
}

impl<S: Kv1, L: Kv1> Debug for LogService<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogService")
            .field("cache", &self.cache)
            .field("lookahead", &self.lookahead)
            .finish_non_exhaustive()
    }
}
