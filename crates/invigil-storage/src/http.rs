//! HTTP storage client
//!
//! Uploads recordings as multipart forms and registers externally hosted
//! recordings as JSON. One request per call; the client never retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::endpoint::{MediaRegistration, StorageEndpoint, StorageReceipt, UploadPackage};
use crate::error::StorageError;
use crate::StorageResult;

const UPLOAD_PATH: &str = "recordings";
const REGISTER_PATH: &str = "recordings/register";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Storage endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the storage service, e.g. `https://media.example.com/api`
    pub base_url: String,
    /// Bearer token (optional for open endpoints)
    pub auth_token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            base_url: std::env::var("INVIGIL_STORAGE_URL").unwrap_or_default(),
            auth_token: std::env::var("INVIGIL_STORAGE_TOKEN").ok(),
            timeout_secs: std::env::var("INVIGIL_STORAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl StorageConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific endpoint
    pub fn new(base_url: &str) -> Self {
        StorageConfig {
            base_url: base_url.to_string(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Storage client over HTTP
pub struct HttpStorageClient {
    config: StorageConfig,
    http_client: reqwest::Client,
}

impl HttpStorageClient {
    /// Create a new storage client
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("invigil-storage/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpStorageClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> StorageResult<Self> {
        Self::new(StorageConfig::from_env())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn url(&self, path: &str) -> StorageResult<String> {
        let base = self.config.base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(StorageError::NotConfigured);
        }
        Ok(format!("{base}/{path}"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl StorageEndpoint for HttpStorageClient {
    async fn upload(&self, package: UploadPackage) -> StorageResult<StorageReceipt> {
        package.validate()?;
        let url = self.url(UPLOAD_PATH)?;
        info!(
            file_name = %package.file_name,
            bytes = package.bytes.len(),
            "Uploading recording"
        );

        let file = Part::bytes(package.bytes)
            .file_name(package.file_name.clone())
            .mime_str(&package.content_type)?;
        let form = Form::new()
            .part("file", file)
            .text("sessionId", package.session_id)
            .text("subjectId", package.subject_id)
            .text("submissionId", package.submission_id)
            .text("expiresAt", package.expires_at.to_rfc3339())
            .text("notify", package.notify.to_string())
            .text("sha256", package.sha256)
            .text("durationSecs", package.duration_secs.to_string());

        let response = self
            .authorize(self.http_client.post(&url))
            .multipart(form)
            .send()
            .await?;
        let receipt = read_receipt(response).await?;

        if receipt.url.is_none() {
            warn!(file_name = %package.file_name, "Upload response carried no url");
            return Err(StorageError::MalformedResponse(
                "upload response has no url".to_string(),
            ));
        }
        debug!(file_name = %package.file_name, "Upload accepted");
        Ok(receipt)
    }

    async fn register(&self, registration: MediaRegistration) -> StorageResult<StorageReceipt> {
        let url = self.url(REGISTER_PATH)?;
        info!(
            session_id = %registration.session_id,
            external_url = %registration.external_url,
            "Registering external recording"
        );

        let response = self
            .authorize(self.http_client.post(&url))
            .json(&registration)
            .send()
            .await?;
        read_receipt(response).await
    }
}

async fn read_receipt(response: reqwest::Response) -> StorageResult<StorageReceipt> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Storage endpoint rejected request");
        return Err(StorageError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(StorageReceipt {
            url: None,
            raw: Value::Null,
        });
    }
    let raw: Value =
        serde_json::from_str(&text).map_err(|e| StorageError::MalformedResponse(e.to_string()))?;
    let url = raw.get("url").and_then(Value::as_str).map(str::to_string);
    Ok(StorageReceipt { url, raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_new() {
        let config = StorageConfig::new("https://media.example.com/api");
        assert_eq!(config.base_url, "https://media.example.com/api");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_storage_config_with_token() {
        let config = StorageConfig::new("https://x").with_token("secret-token");
        assert_eq!(config.auth_token, Some("secret-token".to_string()));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpStorageClient::new(StorageConfig::new("https://x/api/")).unwrap();
        assert_eq!(client.url(UPLOAD_PATH).unwrap(), "https://x/api/recordings");
    }

    #[test]
    fn test_unconfigured_base_url_is_reported() {
        let client = HttpStorageClient::new(StorageConfig::new("")).unwrap();
        assert_eq!(client.url(UPLOAD_PATH), Err(StorageError::NotConfigured));
    }
}
