use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of entries fetched beyond the requested offset on poll.
pub const DEFAULT_LOOKAHEAD: u64 = 10;

/// Default bound on a single store call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of attempts for writing an allocated entry.
pub const DEFAULT_ENTRY_WRITE_ATTEMPTS: usize = 3;

/// Configuration for the `LogService`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogServiceConfig {
    /// Entries eagerly fetched into the cache beyond the requested offset.
    pub lookahead: u64,

    /// Timeout for every call into an external store.
    pub operation_timeout: Duration,

    /// Maximum number of swaps per allocation or commit. Unbounded if not set.
    pub max_cas_attempts: Option<usize>,

    /// Base delay after a conflicting swap, jittered. Retries immediately if
    /// not set.
    pub conflict_backoff: Option<Duration>,

    /// Attempts for the (idempotent) write of an allocated entry.
    pub entry_write_attempts: usize,
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            lookahead: DEFAULT_LOOKAHEAD,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_cas_attempts: None,
            conflict_backoff: None,
            entry_write_attempts: DEFAULT_ENTRY_WRITE_ATTEMPTS,
        }
    }
}
