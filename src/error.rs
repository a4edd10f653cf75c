//! Error taxonomy for the session/mirror core.
//!
//! Each failure family has its own type so callers can tell a rejected
//! login from a flaky network or a corrupt snapshot. Cache misses are not
//! errors; `ResultCache::get` returns `None`.

use thiserror::Error;

/// Authentication failures. Always fatal to the session that hit them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),
}

/// Failures talking to the remote services.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed remote response: {0}")]
    Decode(String),
}

impl TransportError {
    /// 401/403-class responses are answered with one forced renewal.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Status { status: 401 | 403, .. })
    }

    /// Rejections by the remote, as opposed to failures reaching it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Status { status, .. } if (400..500).contains(status))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A snapshot could not be turned into a usable mirror. The previous
/// mirror, if any, stays current.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("snapshot is not valid gzip data: {0}")]
    Decompress(std::io::Error),

    #[error("snapshot is empty")]
    Empty,

    #[error("failed to write mirror file: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not a database file")]
    NotDatabase,

    #[error("snapshot is not a readable database: {0}")]
    Corrupt(#[from] rusqlite::Error),

    #[error("mirror store is closed")]
    Closed,
}

/// Query failures are surfaced as-is and never retried.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("row does not match expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// A write-back targeted a record the mirror does not contain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record not found: {record}")]
pub struct NotFoundError {
    pub record: String,
}

/// Top-level error for every core operation.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("mirror not ready")]
    NotReady,

    #[error("session closed")]
    SessionClosed,

    #[error("{0}")]
    InvalidInput(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Query(QueryError::Sqlite(err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

impl Error {
    /// Errors that end the session and require a fresh login.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::SessionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
