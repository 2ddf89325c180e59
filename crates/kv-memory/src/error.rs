use seqlog_kv::KvError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The store was marked unavailable.
    #[error("memory store unavailable")]
    Unavailable,
}

impl KvError for Error {}
