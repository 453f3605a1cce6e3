//! Unified error type.

use std::time::Duration;

use thiserror::Error;

/// The error type returned by tollgate's fallible operations.
///
/// Application-level failures (404, 422, etc.) are expressed as JSON error
/// envelopes, not as `Error`s. This type surfaces caller-contract violations,
/// encoding failures, transport failures and lifecycle failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Binding, accepting or signal installation failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The envelope writer was handed a status code with no registered
    /// reason phrase. This is a caller bug.
    #[error("http status code {0} is not supported")]
    UnsupportedStatus(u16),

    /// Serialising an envelope failed. Headers may already be sent.
    #[error("encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    /// A handler wrote after the timeout middleware already replied.
    #[error("http: handler timeout")]
    HandlerTimeout,

    /// The reply was abandoned; the connection is closed without a response.
    #[error("request aborted")]
    Aborted,

    /// Reading the request body failed.
    #[error("read request body: {0}")]
    Body(#[from] hyper::Error),

    /// Reading the request body took longer than the read timeout.
    #[error("read request body: timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Graceful shutdown did not finish inside the drain deadline.
    #[error("graceful shutdown timed out after {0:?}")]
    DrainTimeout(Duration),

    /// The background accept loop panicked or was cancelled.
    #[error("accept loop terminated: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A configuration value could not be parsed.
    #[error("invalid {key}: {reason}")]
    Config { key: &'static str, reason: String },

    /// A credential-store call exceeded its timeout.
    #[error("store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("user `{0}` already exists")]
    UserExists(String),

    #[error("user `{0}` not found")]
    UserNotFound(String),

    /// Any other credential-store failure.
    #[error("store: {0}")]
    Store(String),
}

/// Result type alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
