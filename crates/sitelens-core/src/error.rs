//! Failure taxonomy for the fetch layer

use std::time::Duration;

use thiserror::Error;

/// Why a page could not be turned into a signal record.
///
/// None of these abort a chat turn; each one is rendered into a failure
/// context block instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// The wall-clock budget expired and the request was dropped
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The server (or rendering proxy) answered with a non-2xx status
    #[error("HTTP status {0}")]
    HttpError(u16),

    /// DNS, connect, TLS or body transfer failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Body was too small to be a real page (byte length after trimming)
    #[error("response too short ({0} bytes)")]
    TooShort(usize),
}

impl FetchFailure {
    /// Short, user-safe description of the problem for prompt context
    pub fn summary(&self) -> String {
        match self {
            FetchFailure::Timeout(after) => {
                format!("the site did not respond within {} seconds", after.as_secs())
            }
            FetchFailure::HttpError(status) => {
                format!("the site returned HTTP status {status}")
            }
            FetchFailure::NetworkError(_) => "the site could not be reached".to_string(),
            FetchFailure::TooShort(_) => "the site returned almost no content".to_string(),
        }
    }
}
