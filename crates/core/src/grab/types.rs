//! Grab records and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::ParsedQuality;
use crate::searcher::CandidateRelease;
use crate::slots::SlotSnapshot;

/// The parts of a candidate worth keeping once it has been grabbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSnapshot {
    pub title: String,
    pub size_bytes: u64,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    pub quality: ParsedQuality,
}

impl From<&CandidateRelease> for ReleaseSnapshot {
    fn from(c: &CandidateRelease) -> Self {
        Self {
            title: c.title.clone(),
            size_bytes: c.size_bytes,
            source: c.source.clone(),
            info_hash: c.info_hash.clone(),
            quality: c.quality.clone(),
        }
    }
}

/// Persisted fact that a release was submitted to a download client.
/// Never mutated; its outcome is recorded separately as a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabRecord {
    pub id: String,
    pub target_id: String,
    pub slot: SlotSnapshot,
    pub release: ReleaseSnapshot,
    pub client: String,
    pub job_id: String,
    pub grabbed_at: DateTime<Utc>,
}

/// How the import pipeline finished with a grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrabResolution {
    Imported,
    Upgraded,
    Rejected,
    DownloadFailed,
}

impl GrabResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrabResolution::Imported => "imported",
            GrabResolution::Upgraded => "upgraded",
            GrabResolution::Rejected => "rejected",
            GrabResolution::DownloadFailed => "download_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imported" => Some(GrabResolution::Imported),
            "upgraded" => Some(GrabResolution::Upgraded),
            "rejected" => Some(GrabResolution::Rejected),
            "download_failed" => Some(GrabResolution::DownloadFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub grab_id: String,
    pub resolution: GrabResolution,
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum GrabStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum GrabError {
    /// Another grab for the same target and slot is in progress.
    #[error("Grab already in progress for target {target_id} slot {slot_id}")]
    Conflict { target_id: String, slot_id: String },

    /// The slot already has a submitted grab waiting to be imported.
    #[error("Grab {grab_id} is already pending for target {target_id} slot {slot_id}")]
    AlreadyPending {
        target_id: String,
        slot_id: String,
        grab_id: String,
    },

    #[error("No download client available: {0}")]
    NoDownloadClient(String),

    #[error("Release has no download link: {0}")]
    NoDownloadLink(String),

    #[error("Download client rejected submission: {0}")]
    Submission(String),

    #[error("Grab store error: {0}")]
    Store(#[from] GrabStoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
