//! Per-key consumer commit markers.

use std::time::Duration;

use seqlog_kv::{CasOutcome, Kv};
use tracing::{debug, error};

use crate::bounded::{BoundedKv, ConflictBudget};
use crate::error::{Error, Result};
use crate::model::{offset_from_stored, offset_to_stored};

/// Tracks the highest offset acknowledged for each key.
///
/// Markers only ever move forward: every update is a swap from the value
/// last observed, and a request that does not exceed the stored marker is a
/// no-op, so racing commits settle on the maximum requested offset.
#[derive(Clone, Debug)]
pub struct CommitTracker<L: Kv> {
    markers: BoundedKv<L>,
    max_cas_attempts: Option<usize>,
    conflict_backoff: Option<Duration>,
}

impl<L: Kv> CommitTracker<L> {
    pub const fn new(
        markers: BoundedKv<L>,
        max_cas_attempts: Option<usize>,
        conflict_backoff: Option<Duration>,
    ) -> Self {
        Self {
            markers,
            max_cas_attempts,
            conflict_backoff,
        }
    }

    /// Raises the marker for `key` to `offset` unless it is already at or
    /// beyond it.
    pub async fn commit(&self, key: &str, offset: u64) -> Result<()> {
        let requested = offset_to_stored(key, offset)?;
        let mut budget =
            ConflictBudget::new("commit", self.max_cas_attempts, self.conflict_backoff);

        let mut stored = match self.markers.read(key).await? {
            Some(stored) => stored,
            None => match self.markers.compare_and_swap(key, None, requested).await? {
                CasOutcome::Swapped => {
                    debug!(key, offset, "seeded commit marker");
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    budget.conflicted(key).await?;
                    self.expect_marker(key).await?
                }
            },
        };

        loop {
            if requested <= stored {
                return Ok(());
            }

            match self
                .markers
                .compare_and_swap(key, Some(stored), requested)
                .await?
            {
                CasOutcome::Swapped => {
                    debug!(key, from = stored, to = requested, "advanced commit marker");
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    budget.conflicted(key).await?;
                    stored = self.expect_marker(key).await?;
                }
            }
        }
    }

    /// Returns the marker for `key`, or `None` if it was never committed.
    pub async fn committed(&self, key: &str) -> Result<Option<u64>> {
        self.markers
            .read(key)
            .await?
            .map(|stored| offset_from_stored(key, stored))
            .transpose()
    }

    // Re-reads a marker that a conflicting swap proved exists.
    async fn expect_marker(&self, key: &str) -> Result<i64> {
        if let Some(stored) = self.markers.read(key).await? {
            return Ok(stored);
        }

        error!(key, "commit marker missing after it was known to exist");
        Err(Error::InvariantViolation {
            key: key.to_string(),
            reason: "commit marker missing after it was known to exist".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use seqlog_kv::Consistency;
    use seqlog_kv_memory::MemoryKv;
    use tracing_test::traced_test;

    /// Reports every key as absent yet refuses to create any of them.
    #[derive(Clone, Debug)]
    struct VanishingKv;

    #[async_trait]
    impl Kv for VanishingKv {
        type Error = seqlog_kv_memory::Error;

        fn consistency(&self) -> Consistency {
            Consistency::Linearizable
        }

        async fn read<K: Into<String> + Send>(
            &self,
            _key: K,
        ) -> std::result::Result<Option<i64>, Self::Error> {
            Ok(None)
        }

        async fn write<K: Into<String> + Send>(
            &self,
            _key: K,
            _value: i64,
        ) -> std::result::Result<(), Self::Error> {
            Ok(())
        }

        async fn compare_and_swap<K: Into<String> + Send>(
            &self,
            _key: K,
            _expected: Option<i64>,
            _new: i64,
        ) -> std::result::Result<CasOutcome, Self::Error> {
            Ok(CasOutcome::Conflict)
        }
    }

    fn tracker(kv: &MemoryKv) -> CommitTracker<MemoryKv> {
        CommitTracker::new(
            BoundedKv::new(kv.clone(), Duration::from_secs(1)),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_first_commit_seeds_marker() {
        let kv = MemoryKv::linearizable();
        let tracker = tracker(&kv);

        assert_eq!(tracker.committed("x").await.unwrap(), None);

        tracker.commit("x", 3).await.unwrap();
        assert_eq!(tracker.committed("x").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_commit_never_regresses() {
        let kv = MemoryKv::linearizable();
        let tracker = tracker(&kv);

        tracker.commit("x", 5).await.unwrap();
        tracker.commit("x", 2).await.unwrap();
        assert_eq!(tracker.committed("x").await.unwrap(), Some(5));

        tracker.commit("x", 5).await.unwrap();
        tracker.commit("x", 9).await.unwrap();
        assert_eq!(tracker.committed("x").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_stale_commit_does_not_swap() {
        let kv = MemoryKv::linearizable();
        let tracker = tracker(&kv);

        tracker.commit("x", 5).await.unwrap();
        let swaps = kv.stats().swaps;

        tracker.commit("x", 4).await.unwrap();
        assert_eq!(kv.stats().swaps, swaps);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_commits_settle_on_maximum() {
        let kv = MemoryKv::linearizable();
        let tracker = Arc::new(tracker(&kv));

        let handles: Vec<_> = (0..50u64)
            .map(|i| {
                let tracker = tracker.clone();
                // Interleave high and low requests
                let offset = if i % 2 == 0 { i } else { 100 - i };
                tokio::spawn(async move { tracker.commit("x", offset).await.unwrap() })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.committed("x").await.unwrap(), Some(99));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_commit() {
        let kv = MemoryKv::linearizable();
        let tracker = tracker(&kv);

        kv.set_available(false);

        assert_matches!(tracker.commit("x", 1).await, Err(Error::Unavailable { .. }));
        assert_matches!(tracker.committed("x").await, Err(Error::Unavailable { .. }));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_marker_missing_after_seed_conflict_is_fatal() {
        let tracker = CommitTracker::new(
            BoundedKv::new(VanishingKv, Duration::from_secs(1)),
            None,
            None,
        );

        assert_matches!(
            tracker.commit("x", 1).await,
            Err(Error::InvariantViolation { key, .. }) if key == "x"
        );
        assert!(logs_contain("commit marker missing"));
    }

    #[tokio::test]
    async fn test_seed_conflict_counts_against_budget() {
        let tracker = CommitTracker::new(
            BoundedKv::new(VanishingKv, Duration::from_secs(1)),
            Some(1),
            None,
        );

        assert_matches!(
            tracker.commit("x", 1).await,
            Err(Error::ContentionExhausted { operation: "commit", attempts: 1, .. })
        );
    }

    #[tokio::test]
    async fn test_negative_marker_is_an_invariant_violation() {
        let kv = MemoryKv::linearizable();
        kv.write("x", -1).await.unwrap();
        let tracker = tracker(&kv);

        assert_matches!(
            tracker.committed("x").await,
            Err(Error::InvariantViolation { .. })
        );
    }
}
