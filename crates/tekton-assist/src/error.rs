//! Error types shared by the cache and the diagnosis engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the resource cache and the inspector
#[derive(Error, Debug)]
pub enum Error {
    /// Key is absent from the local index
    #[error("{kind} {namespace}/{name} not found in cache")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The cache never reached readiness before cancellation
    #[error("cache did not sync before cancellation (pending: {pending})")]
    SyncTimeout { pending: String },

    #[error("failed to get {kind} {namespace}/{name}: {source}")]
    FetchFailed {
        kind: &'static str,
        namespace: String,
        name: String,
        source: Box<Error>,
    },

    #[error("failed to list {kind} for {owner}: {source}")]
    ListFailed {
        kind: &'static str,
        owner: String,
        source: Box<Error>,
    },

    /// Container log retrieval failed. The inspector always absorbs this one.
    #[error("failed to fetch logs for {namespace}/{pod} container {container}: {source}")]
    LogFetchFailed {
        namespace: String,
        pod: String,
        container: String,
        source: Box<Error>,
    },

    #[error("Invalid label selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

/// Result type used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Closed classification of remote-store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    NotFound,
    Forbidden,
    Unauthorized,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "NotFound",
            ErrorClass::Forbidden => "Forbidden",
            ErrorClass::Unauthorized => "Unauthorized",
            ErrorClass::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an error by its API status code, falling back to the status reason.
///
/// Wrapping variants are unwrapped to their cause first; a cache miss counts
/// as `NotFound`.
pub fn classify_error(err: &Error) -> ErrorClass {
    match err {
        Error::NotFound { .. } => ErrorClass::NotFound,
        Error::KubeError(kube::Error::Api(resp)) => match (resp.code, resp.reason.as_str()) {
            (404, _) | (_, "NotFound") => ErrorClass::NotFound,
            (403, _) | (_, "Forbidden") => ErrorClass::Forbidden,
            (401, _) | (_, "Unauthorized") => ErrorClass::Unauthorized,
            _ => ErrorClass::Unknown,
        },
        Error::FetchFailed { source, .. }
        | Error::ListFailed { source, .. }
        | Error::LogFetchFailed { source, .. } => classify_error(source),
        _ => ErrorClass::Unknown,
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request failed with {reason}"),
        reason: reason.to_string(),
        code,
    }))
}
