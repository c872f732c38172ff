//! Error types for the group client, and their projection into `ErrorInfo`.
//!
//! # Design
//! `Request` is the only variant the server is responsible for. It carries the
//! decoded `{errcode, error}` envelope when the body had one, which is what the
//! `try_*` operations hand back as a value. Everything else (bad input, a
//! dropped connection, a response that breaks the protocol) stays an error,
//! even through a `try_*` call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error reported by the homeserver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub errcode: String,
    pub error: String,
}

impl ErrorInfo {
    /// Decode a server error envelope. Returns `None` for anything that is not
    /// a JSON object with a string `errcode`.
    pub fn from_body(body: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let errcode = value.get("errcode")?.as_str()?.to_string();
        let error = value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self { errcode, error })
    }
}

/// Errors returned by group operations.
#[derive(Debug, Error)]
pub enum GroupError {
    /// A tag order outside `[0, 1]`. Raised before any request is sent.
    #[error("tag order {0} is out of range [0, 1]")]
    InvalidTagOrder(f64),

    /// The server answered with a status that was not in the call's ignore-set.
    #[error("request failed with HTTP {status}{}", describe(.info))]
    Request {
        status: u16,
        info: Option<ErrorInfo>,
        body: String,
    },

    /// No response was received.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A successful response did not match the expected shape.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

fn describe(info: &Option<ErrorInfo>) -> String {
    match info {
        Some(info) => format!(": {} {}", info.errcode, info.error),
        None => String::new(),
    }
}

impl GroupError {
    /// The server's error envelope, if this failure carries one.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            GroupError::Request { info, .. } => info.as_ref(),
            _ => None,
        }
    }

    /// Convert a server-reported failure into its `ErrorInfo`.
    ///
    /// Any other error, including a `Request` failure whose body had no
    /// envelope, is handed back unchanged.
    pub fn into_error_info(self) -> Result<ErrorInfo, GroupError> {
        match self {
            GroupError::Request {
                info: Some(info), ..
            } => Ok(info),
            other => Err(other),
        }
    }
}

/// Derive a `try_*` outcome from the result of the matching throwing call.
///
/// `Ok(None)` means the call succeeded and its side effect applied.
/// `Ok(Some(info))` means the server rejected it with a structured error.
/// `Err` is everything the server did not classify: validation, transport
/// and decode failures.
pub fn attempt<T>(result: Result<T, GroupError>) -> Result<Option<ErrorInfo>, GroupError> {
    match result {
        Ok(_) => Ok(None),
        Err(e) => e.into_error_info().map(Some),
    }
}
