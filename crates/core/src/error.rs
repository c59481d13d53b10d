//! Crate-wide error type for the retrieval pipeline
//!
//! Mirrors the error taxonomy in the external HTTP surface: each variant
//! maps to exactly one HTTP status and retriability flag at the server
//! boundary (see `ragbridge_server::http::error_response`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("deadline exceeded in stage {stage}")]
    DeadlineExceeded { stage: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a client may usefully retry the request unmodified.
    pub fn retriable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::DeadlineExceeded { .. })
    }

    /// Short machine-readable kind used in the HTTP error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::DeadlineExceeded { .. } => "DeadlineExceeded",
            Error::Internal(_) => "Internal",
        }
    }
}
