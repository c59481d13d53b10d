//! Retrieval-crate error type and its boundary conversion into
//! `ragbridge_core::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("document store error: {0}")]
    DocumentStore(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("reranker error: {0}")]
    Reranker(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout in stage {stage}")]
    Timeout { stage: &'static str },

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<RetrievalError> for ragbridge_core::Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Timeout { stage } => ragbridge_core::Error::DeadlineExceeded { stage },
            RetrievalError::DocumentStore(_)
            | RetrievalError::Connection(_)
            | RetrievalError::Search(_) => ragbridge_core::Error::BackendUnavailable(err.to_string()),
            RetrievalError::Embedding(_)
            | RetrievalError::Index(_)
            | RetrievalError::Reranker(_)
            | RetrievalError::NotFound(_) => ragbridge_core::Error::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
