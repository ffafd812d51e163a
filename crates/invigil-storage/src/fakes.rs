//! In-memory storage endpoint (testing only)

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::endpoint::{MediaRegistration, StorageEndpoint, StorageReceipt, UploadPackage};
use crate::error::StorageError;
use crate::StorageResult;

/// Records every package and registration it receives.
#[derive(Debug, Default)]
pub struct MemoryStorageEndpoint {
    uploads: Mutex<Vec<UploadPackage>>,
    registrations: Mutex<Vec<MediaRegistration>>,
    failures: Mutex<VecDeque<StorageError>>,
    latency: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStorageEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated round-trip time for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: StorageError) {
        lock(&self.failures).push_back(error);
    }

    pub fn uploads(&self) -> Vec<UploadPackage> {
        lock(&self.uploads).clone()
    }

    pub fn registrations(&self) -> Vec<MediaRegistration> {
        lock(&self.registrations).clone()
    }

    async fn round_trip(&self) -> StorageResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageEndpoint for MemoryStorageEndpoint {
    async fn upload(&self, package: UploadPackage) -> StorageResult<StorageReceipt> {
        package.validate()?;
        self.round_trip().await?;
        let url = format!("memory://recordings/{}", package.file_name);
        lock(&self.uploads).push(package);
        Ok(StorageReceipt {
            url: Some(url.clone()),
            raw: serde_json::json!({ "url": url }),
        })
    }

    async fn register(&self, registration: MediaRegistration) -> StorageResult<StorageReceipt> {
        self.round_trip().await?;
        lock(&self.registrations).push(registration);
        Ok(StorageReceipt {
            url: None,
            raw: serde_json::json!({ "registered": true }),
        })
    }
}
