//! Storage endpoint contract and wire types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StorageResult;

/// A finalised recording packaged for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPackage {
    /// Generated unique file name
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub session_id: String,
    pub subject_id: String,
    pub submission_id: String,
    /// Retention hint for the receiving store
    pub expires_at: DateTime<Utc>,
    /// Ask the receiving party to notify its recipient
    pub notify: bool,
    /// SHA-256 hex digest of `bytes`
    pub sha256: String,
    pub duration_secs: u64,
}

impl UploadPackage {
    /// Reject packages the endpoint could never accept.
    pub fn validate(&self) -> StorageResult<()> {
        if self.bytes.is_empty() {
            return Err(crate::StorageError::InvalidPackage(
                "payload is empty".to_string(),
            ));
        }
        if self.session_id.is_empty() {
            return Err(crate::StorageError::InvalidPackage(
                "session id is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Registration of a recording hosted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRegistration {
    pub session_id: String,
    pub subject_id: String,
    pub submission_id: String,
    pub external_url: String,
    /// Duration in seconds
    pub duration: u64,
}

/// What the endpoint returned on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageReceipt {
    /// Where the stored media can be fetched, when the endpoint reports it
    pub url: Option<String>,
    /// Full response body for diagnostics
    pub raw: serde_json::Value,
}

/// External storage for finalised recordings.
///
/// Implementations perform exactly one attempt per call. Retry policy belongs
/// to the caller.
#[async_trait]
pub trait StorageEndpoint: Send + Sync {
    /// Upload the package bytes and metadata.
    async fn upload(&self, package: UploadPackage) -> StorageResult<StorageReceipt>;

    /// Register an externally hosted recording by URL.
    async fn register(&self, registration: MediaRegistration) -> StorageResult<StorageReceipt>;
}
