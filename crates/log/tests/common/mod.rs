//! Test helpers shared by the log service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use seqlog_kv::{CasOutcome, Consistency, Kv, Kv1};
use seqlog_kv_memory::{Error, MemoryKv};
use seqlog_log::{LogService, LogServiceConfig};

/// Installs a subscriber writing to the test output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wraps a `MemoryKv` with scripted faults: a number of forced swap
/// conflicts, and topics whose every call fails.
#[derive(Clone, Debug)]
pub struct ScriptedKv {
    inner: MemoryKv,
    forced_conflicts: Arc<AtomicUsize>,
    failing_topics: Arc<Mutex<Vec<String>>>,
}

impl ScriptedKv {
    pub fn new(inner: MemoryKv) -> Self {
        Self {
            inner,
            forced_conflicts: Arc::new(AtomicUsize::new(0)),
            failing_topics: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next `count` swaps report a conflict without touching the store.
    pub fn force_conflicts(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Every call on `topic` (its counter, marker or entries) fails.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().push(topic.to_string());
    }

    pub fn inner(&self) -> &MemoryKv {
        &self.inner
    }

    fn check(&self, key: &str) -> Result<(), Error> {
        let failing = self.failing_topics.lock().unwrap();
        let hit = failing
            .iter()
            .any(|topic| key == topic || key.starts_with(&format!("{topic}:")));

        if hit { Err(Error::Unavailable) } else { Ok(()) }
    }
}

#[async_trait]
impl Kv for ScriptedKv {
    type Error = Error;

    fn consistency(&self) -> Consistency {
        self.inner.consistency()
    }

    async fn read<K: Into<String> + Send>(&self, key: K) -> Result<Option<i64>, Self::Error> {
        let key = key.into();
        self.check(&key)?;
        self.inner.read(key).await
    }

    async fn write<K: Into<String> + Send>(&self, key: K, value: i64) -> Result<(), Self::Error> {
        let key = key.into();
        self.check(&key)?;
        self.inner.write(key, value).await
    }

    async fn compare_and_swap<K: Into<String> + Send>(
        &self,
        key: K,
        expected: Option<i64>,
        new: i64,
    ) -> Result<CasOutcome, Self::Error> {
        let key = key.into();
        self.check(&key)?;

        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(CasOutcome::Conflict);
        }

        self.inner.compare_and_swap(key, expected, new).await
    }
}

impl Kv1 for ScriptedKv {
    type Scoped = Self;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped {
        Self {
            inner: self.inner.scope(scope),
            forced_conflicts: self.forced_conflicts.clone(),
            failing_topics: self.failing_topics.clone(),
        }
    }
}

/// Stores shared by every node of a test cluster.
#[derive(Clone, Debug)]
pub struct SharedStores {
    pub entries: MemoryKv,
    pub counters: MemoryKv,
}

impl SharedStores {
    pub fn new() -> Self {
        Self {
            entries: MemoryKv::sequential(),
            counters: MemoryKv::linearizable(),
        }
    }

    /// A node with its own cache over the shared stores.
    pub fn node(&self) -> LogService<MemoryKv, MemoryKv> {
        self.node_with(LogServiceConfig::default())
    }

    pub fn node_with(&self, config: LogServiceConfig) -> LogService<MemoryKv, MemoryKv> {
        LogService::new(self.entries.clone(), self.counters.clone(), config)
            .expect("counter store is linearizable")
    }
}
