//! Error types for the extraction and indexing pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Extraction job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Document has no extracted text yet
    #[error("Document {0} has not been extracted")]
    NotExtracted(String),

    /// Retryable extraction failure (rate limit, timeout, 5xx)
    #[error("Transient extraction failure: {0}")]
    ExtractionTransient(String),

    /// Non-retryable extraction failure (malformed or oversized section)
    #[error("Extraction failed: {0}")]
    ExtractionPermanent(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Analytical vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Primary store (SQLite) error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint blob error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// PDF structure error
    #[error("PDF error: {0}")]
    Pdf(String),

    /// Request validation error
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transient extraction error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::ExtractionTransient(message.into())
    }

    /// Create a permanent extraction error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::ExtractionPermanent(message.into())
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a failed extraction call may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ExtractionTransient(_) => true,
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map_or(false, |s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            _ => false,
        }
    }

    /// Classify an HTTP status returned by an extraction service
    pub fn from_extraction_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("extraction service returned {}: {}", status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::ExtractionTransient(message)
        } else {
            Self::ExtractionPermanent(message)
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::Pdf(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "config_error", msg.clone()),
            Error::DocumentNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Document not found: {}", id),
            ),
            Error::JobNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Job not found: {}", id),
            ),
            Error::NotExtracted(id) => (
                StatusCode::CONFLICT,
                "not_extracted",
                format!("Document {} has not been extracted", id),
            ),
            Error::ExtractionTransient(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "extraction_unavailable", msg.clone())
            }
            Error::ExtractionPermanent(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "extraction_error", msg.clone())
            }
            Error::Embedding(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "embedding_error", msg.clone())
            }
            Error::VectorStore(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "vector_store_error", msg.clone())
            }
            Error::Storage(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg.clone())
            }
            Error::Checkpoint(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "checkpoint_error", msg.clone())
            }
            Error::Pdf(msg) => (StatusCode::BAD_REQUEST, "pdf_error", msg.clone()),
            Error::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let rate_limited = Error::from_extraction_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(rate_limited.is_transient());

        let unavailable = Error::from_extraction_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(unavailable.is_transient());

        let too_large = Error::from_extraction_status(reqwest::StatusCode::PAYLOAD_TOO_LARGE, "");
        assert!(!too_large.is_transient());

        assert!(!Error::permanent("bad section").is_transient());
    }
}
