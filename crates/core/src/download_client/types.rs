//! Types for download client operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::searcher::CandidateRelease;

/// Errors that can occur during download client operations.
#[derive(Debug, Error)]
pub enum DownloadClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Status of a job in a download client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Downloading,
    Paused,
    /// Payload fully downloaded (possibly still seeding).
    Completed,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Paused => "paused",
            QueueStatus::Completed => "completed",
            QueueStatus::Error => "error",
        }
    }

    pub fn all() -> [QueueStatus; 5] {
        [
            QueueStatus::Queued,
            QueueStatus::Downloading,
            QueueStatus::Paused,
            QueueStatus::Completed,
            QueueStatus::Error,
        ]
    }
}

/// Live mirror of one download client job. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Name of the client holding the job.
    pub client: String,
    /// Client-assigned job id (info hash for torrent clients).
    pub job_id: String,
    pub name: String,
    pub status: QueueStatus,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    pub size_bytes: u64,
    pub downloaded_bytes: u64,
    /// Current download speed in bytes/second.
    pub download_speed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
    /// File or top-level directory holding the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueItem {
    pub fn is_completed(&self) -> bool {
        self.status == QueueStatus::Completed
    }
}

/// Capability to hand releases to a download client and observe its queue.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Client name, unique across configured clients.
    fn name(&self) -> &str;

    /// Submit a release; returns the client's job id.
    async fn submit(&self, release: &CandidateRelease) -> Result<String, DownloadClientError>;

    /// All jobs currently known to the client.
    async fn queue(&self) -> Result<Vec<QueueItem>, DownloadClientError>;

    async fn pause(&self, job_id: &str) -> Result<(), DownloadClientError>;

    async fn resume(&self, job_id: &str) -> Result<(), DownloadClientError>;

    async fn remove(&self, job_id: &str, delete_files: bool) -> Result<(), DownloadClientError>;
}
