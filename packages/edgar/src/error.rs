//! Typed errors for the EDGAR adapters.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on failure kinds.

use thiserror::Error;

/// Errors that can occur while fetching from EDGAR.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP transport failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status that is not handled as "no data"
    #[error("unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// Failed to build the HTTP client
    #[error("client build error: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type alias for EDGAR fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
