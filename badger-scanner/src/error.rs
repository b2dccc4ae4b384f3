use badger_core::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{url} answered with status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// A failure at the transport level that may succeed if tried again
    /// right away (refused/reset connection, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            ScanError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Durability failures end the whole crawl; everything else only ends
    /// the page or image it happened on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::StoreError(_))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
