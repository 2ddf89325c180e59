use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

/// Result type for log service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the log service.
#[derive(Debug, Error)]
pub enum Error {
    /// The external store could not be reached.
    #[error("store unavailable during {operation} on `{key}`: {message}")]
    Unavailable {
        /// The store operation that failed.
        operation: &'static str,
        /// The store key involved.
        key: String,
        /// The store's error message.
        message: String,
    },

    /// A store call did not complete within the configured bound.
    #[error("{operation} on `{key}` timed out after {timeout:?}")]
    Timeout {
        /// The store operation that timed out.
        operation: &'static str,
        /// The store key involved.
        key: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The configured bound on conflicting swaps was reached.
    #[error("gave up {operation} on `{key}` after {attempts} conflicting swaps")]
    ContentionExhausted {
        /// The operation that kept conflicting.
        operation: &'static str,
        /// The topic key involved.
        key: String,
        /// Number of swaps attempted.
        attempts: usize,
    },

    /// Stored state contradicts what the protocol guarantees.
    #[error("invariant violated for `{key}`: {reason}")]
    InvariantViolation {
        /// The topic key involved.
        key: String,
        /// What was observed.
        reason: String,
    },

    /// The request was rejected before touching any store.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A store that must be linearizable is not.
    #[error("the {store} store must be linearizable")]
    NotLinearizable {
        /// Which store was misconfigured.
        store: &'static str,
    },

    /// Some keys of a multi-key request failed; the others completed.
    #[error("request failed for {} key(s)", .failures.len())]
    Batch {
        /// The failure of each failed key.
        failures: BTreeMap<String, Error>,
    },
}

impl Error {
    /// Whether the failure is transient and the request may be retried by
    /// the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::ContentionExhausted { .. } => {
                true
            }
            Self::Batch { failures } => failures.values().all(Self::is_transient),
            Self::InvariantViolation { .. }
            | Self::MalformedRequest(_)
            | Self::NotLinearizable { .. } => false,
        }
    }
}
