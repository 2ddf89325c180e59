//! Replicated append-only log service.
//!
//! Assigns durable, monotonically increasing offsets to messages published
//! under a topic key, serves range reads of those messages, and tracks the
//! committed offset of each key. Entries are kept in a sequentially
//! consistent store; offset counters and commit markers in a linearizable
//! one, updated only through compare-and-swap.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod allocator;
mod bounded;
mod cache;
mod commits;
mod config;
mod entries;
mod error;
mod model;
mod router;
mod service;

pub use cache::{LocalCache, Slot};
pub use config::{
    DEFAULT_ENTRY_WRITE_ATTEMPTS, DEFAULT_LOOKAHEAD, DEFAULT_OPERATION_TIMEOUT, LogServiceConfig,
};
pub use error::{Error, Result};
pub use model::Entry;
pub use router::{Request, Response, codes};
pub use service::LogService;
