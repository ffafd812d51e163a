//! Packaging and hand-off of finalized recordings to external storage.
//!
//! Every attempt becomes an [`UploadTask`] that settles exactly once. Failures
//! are returned as [`UploadResult::Failure`], never raised, and never retried
//! here.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use invigil_storage::{MediaRegistration, StorageEndpoint, StorageReceipt, StorageResult, UploadPackage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::context::SessionIds;
use crate::lock;
use crate::metrics::METRICS;
use crate::obs;
use crate::recording::RecordingArtifact;

/// Discriminated result of one upload or registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadResult {
    Success { url: Option<String> },
    Failure { message: String },
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success { .. })
    }

    pub fn failure(message: impl Into<String>) -> Self {
        UploadResult::Failure {
            message: message.into(),
        }
    }
}

/// Outcome of an [`UploadTask`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    #[default]
    Pending,
    Success { url: Option<String> },
    Failure { reason: String },
}

/// One upload or registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: Uuid,
    pub ids: SessionIds,
    /// Recording uploaded by this task, if any
    pub artifact_id: Option<Uuid>,
    /// Generated file name or the registered external URL
    pub target: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    outcome: UploadOutcome,
}

impl UploadTask {
    fn new(ids: SessionIds, artifact_id: Option<Uuid>, target: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            ids,
            artifact_id,
            target,
            expires_at: None,
            created_at: Utc::now(),
            outcome: UploadOutcome::Pending,
        }
    }

    pub fn outcome(&self) -> &UploadOutcome {
        &self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome != UploadOutcome::Pending
    }

    /// Record the result. Returns `false` if already settled.
    pub fn settle(&mut self, result: &UploadResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.outcome = match result {
            UploadResult::Success { url } => UploadOutcome::Success { url: url.clone() },
            UploadResult::Failure { message } => UploadOutcome::Failure {
                reason: message.clone(),
            },
        };
        true
    }
}

/// File extension for a MIME type such as `video/webm;codecs=vp9`.
fn extension_for(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => subtype.trim_start_matches("x-"),
        _ => "bin",
    }
}

/// Hands finalized artifacts to a [`StorageEndpoint`].
pub struct UploadCoordinator {
    config: UploadConfig,
    endpoint: Arc<dyn StorageEndpoint>,
    tasks: Mutex<VecDeque<UploadTask>>,
}

impl UploadCoordinator {
    pub fn new(config: UploadConfig, endpoint: Arc<dyn StorageEndpoint>) -> Self {
        Self {
            config,
            endpoint,
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Build the transferable package for `artifact`.
    pub fn package(&self, ids: &SessionIds, artifact: &RecordingArtifact) -> UploadPackage {
        let file_name = format!(
            "{}-{}-{}.{}",
            self.config.file_prefix,
            ids.session_id,
            Uuid::new_v4(),
            extension_for(&artifact.mime_type)
        );
        UploadPackage {
            file_name,
            content_type: artifact.mime_type.clone(),
            bytes: artifact.bytes.clone(),
            session_id: ids.session_id.clone(),
            subject_id: ids.subject_id.clone(),
            submission_id: ids.submission_id.clone(),
            expires_at: Utc::now() + ChronoDuration::days(i64::from(self.config.retention_days)),
            notify: self.config.notify_recipient,
            sha256: hex::encode(Sha256::digest(&artifact.bytes)),
            duration_secs: artifact.duration_secs,
        }
    }

    /// Upload a finalized recording. Never fails past this call.
    pub async fn upload(&self, ids: &SessionIds, artifact: &RecordingArtifact) -> UploadResult {
        let package = self.package(ids, artifact);
        let mut task = UploadTask::new(ids.clone(), Some(artifact.id), package.file_name.clone());
        task.expires_at = Some(package.expires_at);
        let task_id = self.track(task);

        let received = match package.validate() {
            Ok(()) => self.endpoint.upload(package).await,
            Err(err) => Err(err),
        };
        self.settle(task_id, &ids.session_id, received)
    }

    /// Register a recording hosted elsewhere by URL.
    pub async fn register_external(
        &self,
        ids: &SessionIds,
        external_url: &str,
        duration_secs: u64,
    ) -> UploadResult {
        let task_id = self.track(UploadTask::new(ids.clone(), None, external_url.to_string()));
        if external_url.trim().is_empty() {
            return self.settle(
                task_id,
                &ids.session_id,
                Err(invigil_storage::StorageError::InvalidPackage(
                    "external url is empty".to_string(),
                )),
            );
        }
        let registration = MediaRegistration {
            session_id: ids.session_id.clone(),
            subject_id: ids.subject_id.clone(),
            submission_id: ids.submission_id.clone(),
            external_url: external_url.to_string(),
            duration: duration_secs,
        };
        let received = self.endpoint.register(registration).await;
        let result = self.settle(task_id, &ids.session_id, received);
        match result {
            // Registration echoes nothing useful back; the URL is already known.
            UploadResult::Success { url: None } => UploadResult::Success {
                url: Some(external_url.to_string()),
            },
            other => other,
        }
    }

    /// Recent attempts, oldest first.
    ///
    /// Pending tasks are always kept; settled ones beyond
    /// `task_history` are dropped oldest first.
    pub fn tasks(&self) -> Vec<UploadTask> {
        lock(&self.tasks).iter().cloned().collect()
    }

    fn track(&self, task: UploadTask) -> Uuid {
        let id = task.id;
        let mut tasks = lock(&self.tasks);
        tasks.push_back(task);
        self.prune(&mut tasks);
        id
    }

    fn prune(&self, tasks: &mut VecDeque<UploadTask>) {
        let mut settled = tasks.iter().filter(|t| t.is_terminal()).count();
        while settled > self.config.task_history {
            match tasks.iter().position(UploadTask::is_terminal) {
                Some(oldest) => {
                    tasks.remove(oldest);
                    settled -= 1;
                }
                None => break,
            }
        }
    }

    fn settle(
        &self,
        task_id: Uuid,
        session_id: &str,
        received: StorageResult<StorageReceipt>,
    ) -> UploadResult {
        let result = match received {
            Ok(receipt) => UploadResult::Success { url: receipt.url },
            Err(err) => UploadResult::failure(err.to_string()),
        };
        {
            let mut tasks = lock(&self.tasks);
            if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
                task.settle(&result);
            }
            self.prune(&mut tasks);
        }
        match &result {
            UploadResult::Success { url } => {
                METRICS.inc_uploads_succeeded();
                obs::emit_upload_finished(session_id, true, url.as_deref().unwrap_or_default());
            }
            UploadResult::Failure { message } => {
                METRICS.inc_uploads_failed();
                obs::emit_upload_finished(session_id, false, message);
            }
        }
        result
    }
}
