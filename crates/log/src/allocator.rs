//! Offset allocation against an external linearizable counter.

use std::time::Duration;

use seqlog_kv::{CasOutcome, Kv};
use tracing::{debug, error};

use crate::bounded::{BoundedKv, ConflictBudget};
use crate::error::{Error, Result};
use crate::model::offset_from_stored;

/// Hands out the next offset for a topic key.
///
/// The counter for a key holds the last allocated offset and is only ever
/// changed through compare-and-swap, so allocations are totally ordered per
/// key across every node sharing the store.
#[derive(Clone, Debug)]
pub struct OffsetAllocator<L: Kv> {
    counters: BoundedKv<L>,
    max_cas_attempts: Option<usize>,
    conflict_backoff: Option<Duration>,
}

impl<L: Kv> OffsetAllocator<L> {
    pub const fn new(
        counters: BoundedKv<L>,
        max_cas_attempts: Option<usize>,
        conflict_backoff: Option<Duration>,
    ) -> Self {
        Self {
            counters,
            max_cas_attempts,
            conflict_backoff,
        }
    }

    /// Allocates the next offset for `key`.
    pub async fn allocate(&self, key: &str) -> Result<u64> {
        let mut budget =
            ConflictBudget::new("allocate", self.max_cas_attempts, self.conflict_backoff);
        let mut observed = self.counters.read(key).await?;

        loop {
            let next = match observed {
                Some(last) => last.checked_add(1).ok_or_else(|| Error::InvariantViolation {
                    key: key.to_string(),
                    reason: "offset counter overflowed".into(),
                })?,
                None => 0,
            };

            match self.counters.compare_and_swap(key, observed, next).await? {
                CasOutcome::Swapped => {
                    debug!(key, offset = next, "allocated offset");
                    return offset_from_stored(key, next);
                }
                CasOutcome::Conflict => {
                    budget.conflicted(key).await?;

                    observed = self.counters.read(key).await?;
                    if observed.is_none() {
                        error!(key, "offset counter vanished after a conflicting swap");
                        return Err(Error::InvariantViolation {
                            key: key.to_string(),
                            reason: "offset counter missing after a conflicting swap".into(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use seqlog_kv_memory::MemoryKv;

    fn allocator(kv: &MemoryKv, max_cas_attempts: Option<usize>) -> OffsetAllocator<MemoryKv> {
        OffsetAllocator::new(
            BoundedKv::new(kv.clone(), Duration::from_secs(1)),
            max_cas_attempts,
            None,
        )
    }

    #[tokio::test]
    async fn test_sequential_allocation_starts_at_zero() {
        let kv = MemoryKv::linearizable();
        let allocator = allocator(&kv, None);

        assert_eq!(allocator.allocate("x").await.unwrap(), 0);
        assert_eq!(allocator.allocate("x").await.unwrap(), 1);
        assert_eq!(allocator.allocate("y").await.unwrap(), 0);
        assert_eq!(allocator.allocate("x").await.unwrap(), 2);

        assert_eq!(kv.read("x").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocation_is_contiguous() {
        let kv = MemoryKv::linearizable();
        let allocator = Arc::new(allocator(&kv, None));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.allocate("x").await.unwrap() })
            })
            .collect();

        let mut offsets = BTreeSet::new();
        for handle in handles {
            assert!(offsets.insert(handle.await.unwrap()), "duplicate offset");
        }

        assert_eq!(offsets, (0..64).collect::<BTreeSet<u64>>());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_allocation() {
        let kv = MemoryKv::linearizable();
        let allocator = allocator(&kv, None);

        kv.set_available(false);

        assert_matches!(allocator.allocate("x").await, Err(Error::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_an_invariant_violation() {
        let kv = MemoryKv::linearizable();
        kv.write("x", -5).await.unwrap();
        let allocator = allocator(&kv, None);

        assert_matches!(
            allocator.allocate("x").await,
            Err(Error::InvariantViolation { .. })
        );
    }
}
