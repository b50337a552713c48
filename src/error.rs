use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced an HTTP response (DNS, TLS, connection reset, timeout).
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not cached: {0}")]
    CacheMiss(String),

    #[error("{pending} queued requests still pending ({sent} sent)")]
    UploadPending { sent: u64, pending: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid record for {resource}: {message}")]
    InvalidRecord { resource: String, message: String },

    #[error("Invalid URL: {0}")]
    UrlParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient failures are the ones worth retrying later: reads fall back
    /// to the cache and writes go to the upload queue. Backend rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::UrlParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
