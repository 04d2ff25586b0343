use thiserror::Error;

use crate::models::Strategy;

/// Everything that can go wrong while acquiring screener rows.
///
/// Components convert these into an [`Outcome`](crate::models::Outcome) at
/// their own boundary; only the token provider hands them out directly.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("csrf token not found at {url}")]
    TokenNotFound { url: String },

    #[error("token rejected again after refresh")]
    TokenRejectedAfterRefresh,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("scan rejected by upstream: {0}")]
    ScanRejected(String),

    #[error("no element matched any candidate for {0}")]
    ElementNotFound(String),

    #[error("all strategies exhausted: {0:?}")]
    StrategyExhausted(Vec<Strategy>),

    #[error("browser error: {0}")]
    Browser(String),
}

impl ScrapeError {
    pub fn browser(e: impl std::fmt::Display) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}
