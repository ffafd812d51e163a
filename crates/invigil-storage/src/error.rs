//! Error types for invigil-storage

use thiserror::Error;

/// Errors that can occur while talking to the storage endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Storage endpoint is not configured
    #[error("Storage endpoint is not configured")]
    NotConfigured,

    /// Request could not be built or sent
    #[error("HTTP error: {0}")]
    Http(String),

    /// Endpoint answered with a non-2xx status
    #[error("Storage rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Endpoint answered 2xx but the body was unusable
    #[error("Malformed storage response: {0}")]
    MalformedResponse(String),

    /// Package failed local validation before sending
    #[error("Invalid package: {0}")]
    InvalidPackage(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}
