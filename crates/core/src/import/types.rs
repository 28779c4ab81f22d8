//! Import decisions, outcomes and errors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::grab::GrabStoreError;
use crate::library::{LibraryError, LibraryFile};
use crate::quality::ParsedQuality;

use super::transfer::TransferError;

/// Verdict for one completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportDecision {
    /// The slot had no file.
    New,
    /// The download replaces a lower-ranked file.
    Upgrade,
    RejectLowerQuality,
    /// The grab was already imported or rejected by an earlier run.
    RejectDuplicate,
}

impl ImportDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportDecision::New => "new",
            ImportDecision::Upgrade => "upgrade",
            ImportDecision::RejectLowerQuality => "reject_lower_quality",
            ImportDecision::RejectDuplicate => "reject_duplicate",
        }
    }

    /// Whether the decision changes the library.
    pub fn is_import(&self) -> bool {
        matches!(self, ImportDecision::New | ImportDecision::Upgrade)
    }
}

/// Result of evaluating one completed queue item.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub grab_id: String,
    pub target_id: String,
    pub slot_id: String,
    pub decision: ImportDecision,
    pub reason: String,
    pub quality: ParsedQuality,
    /// Library path of the imported file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// File the upgrade replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<LibraryFile>,
}

/// What happened to one queue item during a scan.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// Not a completed or failed download of ours.
    Ignored,
    Decided(ImportOutcome),
    /// The download client reported the job as failed.
    DownloadFailed { grab_id: String },
}

/// Summary of one import scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Another scan was already running; nothing was done.
    pub skipped: bool,
    pub items_seen: usize,
    pub decisions: Vec<ImportOutcome>,
    pub download_failures: usize,
    pub failures: usize,
}

impl ScanReport {
    pub fn count(&self, decision: ImportDecision) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.decision == decision)
            .count()
    }

    /// One-line summary for task status.
    pub fn summary(&self) -> String {
        if self.skipped {
            return "scan already running".to_string();
        }
        format!(
            "{} items, {} imported, {} upgraded, {} rejected, {} download failures, {} errors",
            self.items_seen,
            self.count(ImportDecision::New),
            self.count(ImportDecision::Upgrade),
            self.count(ImportDecision::RejectLowerQuality) + self.count(ImportDecision::RejectDuplicate),
            self.download_failures,
            self.failures,
        )
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Media target not found: {0}")]
    TargetNotFound(String),

    #[error("Quality profile not found: {0}")]
    MissingProfile(String),

    #[error("Download has no location reported by the client: {0}")]
    NoDownloadPath(String),

    #[error("No video file found in {0}")]
    NoVideoFile(PathBuf),

    #[error("Failed to read download location {path}: {error}")]
    Scan {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Media probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Grab store error: {0}")]
    Grabs(#[from] GrabStoreError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

impl ImportError {
    /// Pipeline stage the error belongs to, for history and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            ImportError::TargetNotFound(_)
            | ImportError::Grabs(_)
            | ImportError::Library(_) => "library",
            ImportError::MissingProfile(_) => "config",
            ImportError::NoDownloadPath(_) | ImportError::NoVideoFile(_) | ImportError::Scan { .. } => {
                "locate"
            }
            ImportError::Probe(_) => "probe",
            ImportError::Transfer(_) => "transfer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_labels() {
        assert_eq!(ImportDecision::RejectLowerQuality.as_str(), "reject_lower_quality");
        assert!(ImportDecision::Upgrade.is_import());
        assert!(!ImportDecision::RejectDuplicate.is_import());
        assert_eq!(
            serde_json::to_string(&ImportDecision::RejectDuplicate).unwrap(),
            "\"reject_duplicate\""
        );
    }

    #[test]
    fn test_error_stage() {
        assert_eq!(ImportError::Probe("boom".into()).stage(), "probe");
        assert_eq!(ImportError::NoVideoFile(PathBuf::from("/x")).stage(), "locate");
        assert_eq!(ImportError::MissingProfile("hd".into()).stage(), "config");
    }

    #[test]
    fn test_skipped_summary() {
        let report = ScanReport {
            skipped: true,
            ..Default::default()
        };
        assert_eq!(report.summary(), "scan already running");
    }
}
