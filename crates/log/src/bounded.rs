//! Timeout-bounded access to an external store, plus the conflict budget
//! shared by every compare-and-swap loop.

use std::future::Future;
use std::time::Duration;

use seqlog_kv::{CasOutcome, Kv};
use tracing::debug;

use crate::error::{Error, Result};

/// Wraps a store so every call is bounded by a timeout and store errors are
/// mapped into [`Error`].
#[derive(Clone, Debug)]
pub struct BoundedKv<K: Kv> {
    kv: K,
    timeout: Duration,
}

impl<K: Kv> BoundedKv<K> {
    pub const fn new(kv: K, timeout: Duration) -> Self {
        Self { kv, timeout }
    }

    pub async fn read(&self, key: &str) -> Result<Option<i64>> {
        self.bounded("read", key, self.kv.read(key)).await
    }

    pub async fn write(&self, key: &str, value: i64) -> Result<()> {
        self.bounded("write", key, self.kv.write(key, value)).await
    }

    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<i64>,
        new: i64,
    ) -> Result<CasOutcome> {
        self.bounded(
            "compare_and_swap",
            key,
            self.kv.compare_and_swap(key, expected, new),
        )
        .await
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, K::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Unavailable {
                operation,
                key: key.to_string(),
                message: e.to_string(),
            }),
            Err(_elapsed) => Err(Error::Timeout {
                operation,
                key: key.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Counts conflicting swaps for one operation and decides whether another
/// attempt is allowed.
#[derive(Debug)]
pub struct ConflictBudget {
    operation: &'static str,
    attempts: usize,
    max_attempts: Option<usize>,
    backoff: Option<Duration>,
}

impl ConflictBudget {
    pub const fn new(
        operation: &'static str,
        max_attempts: Option<usize>,
        backoff: Option<Duration>,
    ) -> Self {
        Self {
            operation,
            attempts: 0,
            max_attempts,
            backoff,
        }
    }

    /// Records a conflicting swap on `key`, waiting out the backoff if one is
    /// configured. Fails once the budget is spent.
    pub async fn conflicted(&mut self, key: &str) -> Result<()> {
        self.attempts += 1;

        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return Err(Error::ContentionExhausted {
                operation: self.operation,
                key: key.to_string(),
                attempts: self.attempts,
            });
        }

        debug!(
            operation = self.operation,
            key,
            attempts = self.attempts,
            "swap conflicted, retrying"
        );

        if let Some(base) = self.backoff {
            // 0-50% jitter so racing nodes spread out
            tokio::time::sleep(base.mul_f64(fastrand::f64().mul_add(0.5, 1.0))).await;
        }

        Ok(())
    }
}
