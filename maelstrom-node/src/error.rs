//! Maelstrom error codes.
//!
//! Every failure that crosses the wire is one of the codes defined by the
//! Maelstrom protocol. Handlers return [`Error`] and the runtime renders it as
//! an `error` body; RPC callers get the peer's `error` body converted back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Body;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("crash: {0}")]
    Crash(String),

    #[error("abort: {0}")]
    Abort(String),

    #[error("key does not exist: {0}")]
    KeyDoesNotExist(String),

    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("txn conflict: {0}")]
    TxnConflict(String),

    #[error("error code {code}: {text}")]
    Other { code: u32, text: String },

    /// The outbound channel is gone; the node is shutting down.
    #[error("node runtime closed")]
    Closed,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    code: u32,
    #[serde(default)]
    text: String,
}

impl Error {
    pub fn malformed(err: serde_json::Error) -> Self {
        Error::MalformedRequest(err.to_string())
    }

    pub fn code(&self) -> u32 {
        match self {
            Error::Timeout(_) => 0,
            Error::NodeNotFound(_) => 1,
            Error::NotSupported(_) => 10,
            Error::TemporarilyUnavailable(_) => 11,
            Error::MalformedRequest(_) => 12,
            Error::Crash(_) | Error::Closed => 13,
            Error::Abort(_) => 14,
            Error::KeyDoesNotExist(_) => 20,
            Error::KeyAlreadyExists(_) => 21,
            Error::PreconditionFailed(_) => 22,
            Error::TxnConflict(_) => 30,
            Error::Other { code, .. } => *code,
        }
    }

    fn text(&self) -> String {
        match self {
            Error::Timeout(text)
            | Error::NodeNotFound(text)
            | Error::NotSupported(text)
            | Error::TemporarilyUnavailable(text)
            | Error::MalformedRequest(text)
            | Error::Crash(text)
            | Error::Abort(text)
            | Error::KeyDoesNotExist(text)
            | Error::KeyAlreadyExists(text)
            | Error::PreconditionFailed(text)
            | Error::TxnConflict(text)
            | Error::Other { text, .. } => text.clone(),
            Error::Closed => self.to_string(),
        }
    }

    /// Renders this error as a Maelstrom `error` body.
    pub fn to_body(&self) -> Body {
        let mut body = Body::new("error");
        body.fields.insert("code".into(), self.code().into());
        body.fields.insert("text".into(), self.text().into());
        body
    }

    /// Rebuilds an error from a peer's `error` body.
    ///
    /// A body that does not even carry a code is reported as a crash so the
    /// caller still sees a failure.
    pub fn from_body(body: &Body) -> Self {
        let ErrorPayload { code, text } = match body.payload::<ErrorPayload>() {
            Ok(payload) => payload,
            Err(err) => return Error::Crash(format!("unreadable error body: {err}")),
        };
        match code {
            0 => Error::Timeout(text),
            1 => Error::NodeNotFound(text),
            10 => Error::NotSupported(text),
            11 => Error::TemporarilyUnavailable(text),
            12 => Error::MalformedRequest(text),
            13 => Error::Crash(text),
            14 => Error::Abort(text),
            20 => Error::KeyDoesNotExist(text),
            21 => Error::KeyAlreadyExists(text),
            22 => Error::PreconditionFailed(text),
            30 => Error::TxnConflict(text),
            code => Error::Other { code, text },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
