//! Abstract interface for the external key/value collaborator backing the log.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for `Kv` errors.
///
/// Any error returned by a store means the store could not be reached or did
/// not answer. Swap conflicts are reported through [`CasOutcome`] instead.
pub trait KvError: Debug + Error + Send + Sync + 'static {}

/// Consistency level a store guarantees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Operations from one writer are observed in order; no global order.
    Sequential,

    /// All operations from all callers appear in a single real-time order.
    Linearizable,
}

/// Result of a compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched and was replaced.
    Swapped,

    /// The stored value did not match the expected one.
    Conflict,
}

/// A trait representing an integer key-value store with asynchronous operations.
#[async_trait]
pub trait Kv: Clone + Send + Sync + 'static {
    /// The error type for store operations.
    type Error: KvError;

    /// The consistency level this store provides.
    fn consistency(&self) -> Consistency;

    /// Reads the value stored at `key`, or `None` if it was never written.
    async fn read<K: Into<String> + Send>(&self, key: K) -> Result<Option<i64>, Self::Error>;

    /// Writes `value` at `key` unconditionally.
    async fn write<K: Into<String> + Send>(&self, key: K, value: i64) -> Result<(), Self::Error>;

    /// Atomically replaces the value at `key` with `new` if it currently
    /// equals `expected`.
    ///
    /// An `expected` of `None` means the key must be absent, so the swap
    /// creates it.
    async fn compare_and_swap<K: Into<String> + Send>(
        &self,
        key: K,
        expected: Option<i64>,
        new: i64,
    ) -> Result<CasOutcome, Self::Error>;
}

/// A trait representing a scoped key-value store.
///
/// Scoped stores share the underlying data with their parent; only the key
/// namespace differs.
pub trait Kv1: Kv {
    /// The scoped store type.
    type Scoped: Kv<Error = Self::Error>;

    /// Narrows the store to keys under `scope`.
    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped;
}
