//! Typed request/response bodies for the four log operations, and their
//! dispatch onto a [`LogService`].
//!
//! Bodies are JSON objects tagged by `type`. Transport, framing and message
//! ids belong to the hosting runtime; this module only maps a decoded body to
//! the reply body.

use std::collections::BTreeMap;

use seqlog_kv::Kv1;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::Error;
use crate::model::Entry;
use crate::service::LogService;

/// Error codes carried by [`Response::Error`].
pub mod codes {
    /// A store call timed out; the operation may or may not have happened.
    pub const TIMEOUT: u16 = 0;

    /// The operation failed and may be retried.
    pub const TEMPORARILY_UNAVAILABLE: u16 = 11;

    /// The request body could not be understood.
    pub const MALFORMED_REQUEST: u16 = 12;

    /// The service observed state it cannot recover from.
    pub const CRASH: u16 = 13;
}

/// A request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Append `msg` to the log for `key`.
    Send {
        /// Topic key.
        key: String,
        /// Payload.
        msg: i64,
    },

    /// Read each key's log from the given offset.
    Poll {
        /// Requested offset per key.
        offsets: BTreeMap<String, u64>,
    },

    /// Raise each key's commit marker.
    CommitOffsets {
        /// Acknowledged offset per key.
        offsets: BTreeMap<String, u64>,
    },

    /// Look up commit markers.
    ListCommittedOffsets {
        /// Keys to look up.
        keys: Vec<String>,
    },
}

/// A reply body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Reply to [`Request::Send`].
    SendOk {
        /// Offset assigned to the message.
        offset: u64,
    },

    /// Reply to [`Request::Poll`].
    PollOk {
        /// Entries per key, as `[offset, value]` pairs.
        msgs: BTreeMap<String, Vec<Entry>>,
    },

    /// Reply to [`Request::CommitOffsets`].
    CommitOffsetsOk,

    /// Reply to [`Request::ListCommittedOffsets`].
    ListCommittedOffsetsOk {
        /// Commit marker per key that has one.
        offsets: BTreeMap<String, u64>,
    },

    /// The request failed.
    Error {
        /// One of [`codes`].
        code: u16,
        /// Human readable description.
        text: String,
    },
}

impl From<Error> for Response {
    fn from(error: Error) -> Self {
        Self::Error {
            code: error_code(&error),
            text: error.to_string(),
        }
    }
}

fn error_code(error: &Error) -> u16 {
    match error {
        Error::Timeout { .. } => codes::TIMEOUT,
        Error::Unavailable { .. } | Error::ContentionExhausted { .. } => {
            codes::TEMPORARILY_UNAVAILABLE
        }
        Error::MalformedRequest(_) => codes::MALFORMED_REQUEST,
        Error::InvariantViolation { .. } | Error::NotLinearizable { .. } => codes::CRASH,
        Error::Batch { failures } => failures
            .values()
            .map(error_code)
            .max_by_key(|&code| severity(code))
            .unwrap_or(codes::TEMPORARILY_UNAVAILABLE),
    }
}

// Ranks codes for a batch: crash, then timeout, then malformed.
const fn severity(code: u16) -> u8 {
    match code {
        codes::CRASH => 3,
        codes::TIMEOUT => 2,
        codes::MALFORMED_REQUEST => 1,
        _ => 0,
    }
}

impl<S: Kv1, L: Kv1> LogService<S, L> {
    /// Executes `request` and builds its reply.
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Send { key, msg } => self
                .append(&key, msg)
                .await
                .map(|offset| Response::SendOk { offset }),
            Request::Poll { offsets } => self
                .poll(&offsets)
                .await
                .map(|msgs| Response::PollOk { msgs }),
            Request::CommitOffsets { offsets } => self
                .commit(&offsets)
                .await
                .map(|()| Response::CommitOffsetsOk),
            Request::ListCommittedOffsets { keys } => self
                .list_committed(&keys)
                .await
                .map(|offsets| Response::ListCommittedOffsetsOk { offsets }),
        };

        result.unwrap_or_else(|e| {
            if error_code(&e) == codes::CRASH {
                error!(error = %e, "request halted");
            } else {
                warn!(error = %e, "request failed");
            }
            e.into()
        })
    }

    /// Decodes a JSON request body, executes it and encodes the reply.
    ///
    /// Bodies that do not decode (unknown type, missing key or offset,
    /// negative offsets) are answered with a malformed-request error without
    /// touching any store.
    pub async fn handle_json(&self, body: Value) -> Value {
        let response = match serde_json::from_value::<Request>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => Error::MalformedRequest(e.to_string()).into(),
        };

        serde_json::to_value(&response).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "error",
                "code": codes::CRASH,
                "text": e.to_string(),
            })
        })
    }
}
