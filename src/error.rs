//! Error types for collaborator failures

use std::time::Duration;
use thiserror::Error;

/// Failure talking to a store, directory, resolver or change feed
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("change feed: {0}")]
    Feed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type SourceResult<T> = Result<T, SourceError>;
