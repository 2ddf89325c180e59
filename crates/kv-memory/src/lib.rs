//! In-memory implementation of the key/value collaborator for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use seqlog_kv::{CasOutcome, Consistency, Kv, Kv1};
use tokio::sync::Mutex;
use tracing::trace;

/// Snapshot of the calls a [`MemoryKv`] has served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KvStats {
    /// Number of `read` calls.
    pub reads: u64,

    /// Number of `write` calls.
    pub writes: u64,

    /// Number of `compare_and_swap` calls.
    pub swaps: u64,
}

#[derive(Debug)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    swaps: AtomicU64,
}

#[derive(Debug)]
struct Faults {
    available: AtomicBool,
    latency_micros: AtomicU64,
}

/// In-memory key-value store.
///
/// Clones and scopes share the same map, statistics and fault settings, so
/// several log service instances handed clones of one `MemoryKv` behave like
/// nodes sharing an external store.
#[derive(Clone, Debug)]
pub struct MemoryKv {
    map: Arc<Mutex<HashMap<String, i64>>>,
    prefix: Option<String>,
    consistency: Consistency,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
}

impl MemoryKv {
    /// Creates a new `MemoryKv` advertising the given consistency level.
    #[must_use]
    pub fn new(consistency: Consistency) -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
            prefix: None,
            consistency,
            counters: Arc::new(Counters {
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
                swaps: AtomicU64::new(0),
            }),
            faults: Arc::new(Faults {
                available: AtomicBool::new(true),
                latency_micros: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a store advertising sequential consistency.
    #[must_use]
    pub fn sequential() -> Self {
        Self::new(Consistency::Sequential)
    }

    /// Creates a store advertising linearizable consistency.
    #[must_use]
    pub fn linearizable() -> Self {
        Self::new(Consistency::Linearizable)
    }

    /// Returns the number of calls served so far, across all scopes.
    #[must_use]
    pub fn stats(&self) -> KvStats {
        KvStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            swaps: self.counters.swaps.load(Ordering::Relaxed),
        }
    }

    /// Makes every subsequent call fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.faults.available.store(available, Ordering::SeqCst);
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.faults.latency_micros.store(micros, Ordering::SeqCst);
    }

    fn get_key<K: Into<String>>(&self, key: K) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, key.into()),
            None => key.into(),
        }
    }

    async fn enter(&self, counter: &AtomicU64) -> Result<(), Error> {
        counter.fetch_add(1, Ordering::Relaxed);

        if !self.faults.available.load(Ordering::SeqCst) {
            return Err(Error::Unavailable);
        }

        let micros = self.faults.latency_micros.load(Ordering::SeqCst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }

        Ok(())
    }
}

#[async_trait]
impl Kv for MemoryKv {
    type Error = Error;

    fn consistency(&self) -> Consistency {
        self.consistency
    }

    async fn read<K: Into<String> + Send>(&self, key: K) -> Result<Option<i64>, Self::Error> {
        let key = self.get_key(key);
        self.enter(&self.counters.reads).await?;

        Ok(self.map.lock().await.get(&key).copied())
    }

    async fn write<K: Into<String> + Send>(&self, key: K, value: i64) -> Result<(), Self::Error> {
        let key = self.get_key(key);
        self.enter(&self.counters.writes).await?;

        self.map.lock().await.insert(key, value);
        Ok(())
    }

    async fn compare_and_swap<K: Into<String> + Send>(
        &self,
        key: K,
        expected: Option<i64>,
        new: i64,
    ) -> Result<CasOutcome, Self::Error> {
        let key = self.get_key(key);
        self.enter(&self.counters.swaps).await?;

        let mut map = self.map.lock().await;
        let current = map.get(&key).copied();

        if current == expected {
            map.insert(key, new);
            Ok(CasOutcome::Swapped)
        } else {
            trace!(%key, ?current, ?expected, "swap conflict");
            Ok(CasOutcome::Conflict)
        }
    }
}

impl Kv1 for MemoryKv {
    type Scoped = Self;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped {
        let new_scope = match &self.prefix {
            Some(existing_scope) => format!("{}:{}", existing_scope, scope.into()),
            None => scope.into(),
        };

        Self {
            map: self.map.clone(),
            prefix: Some(new_scope),
            consistency: self.consistency,
            counters: self.counters.clone(),
            faults: self.faults.clone(),
        }
    }
}
