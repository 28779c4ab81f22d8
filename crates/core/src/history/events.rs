use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// History event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Search
    SearchExecuted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        query: String,
        mode: String,
        sources_queried: Vec<String>,
        candidates: u32,
        duration_ms: u64,
        /// Sources that failed (name -> error message)
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        source_errors: HashMap<String, String>,
    },

    // Grabs
    Grabbed {
        target_id: String,
        slot_id: String,
        grab_id: String,
        release_title: String,
        /// Parsed quality, human readable (e.g. "1080p WEB-DL x264")
        quality: String,
        client: String,
        job_id: String,
    },
    GrabFailed {
        target_id: String,
        slot_id: String,
        release_title: String,
        client: String,
        error: String,
        /// Consecutive failures for this slot, including this one
        failure_count: u32,
    },

    // Import
    ImportDecided {
        target_id: String,
        slot_id: String,
        grab_id: String,
        decision: String,
        reason: String,
    },
    FileImported {
        target_id: String,
        slot_id: String,
        grab_id: String,
        path: String,
        quality: String,
    },
    FileUpgraded {
        target_id: String,
        slot_id: String,
        grab_id: String,
        path: String,
        quality: String,
        replaced_path: String,
        replaced_quality: String,
        /// Whether the replaced file was kept on disk
        replaced_kept: bool,
    },
    ImportFailed {
        target_id: String,
        grab_id: String,
        /// "probe", "transfer" or "library"
        stage: String,
        error: String,
    },
    DownloadFailed {
        target_id: String,
        slot_id: String,
        grab_id: String,
        client: String,
        job_id: String,
        reason: String,
    },

    // Requests
    RequestStatusChanged {
        request_id: String,
        catalog_id: String,
        from: String,
        to: String,
    },
}

impl HistoryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::SearchExecuted { .. } => "search_executed",
            Self::Grabbed { .. } => "grabbed",
            Self::GrabFailed { .. } => "grab_failed",
            Self::ImportDecided { .. } => "import_decided",
            Self::FileImported { .. } => "file_imported",
            Self::FileUpgraded { .. } => "file_upgraded",
            Self::ImportFailed { .. } => "import_failed",
            Self::DownloadFailed { .. } => "download_failed",
            Self::RequestStatusChanged { .. } => "request_status_changed",
        }
    }

    /// Media the event is about: a target id, or the catalog id for
    /// request status changes.
    pub fn media_id(&self) -> Option<&str> {
        match self {
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
            Self::SearchExecuted { target_id, .. } => target_id.as_deref(),
            Self::Grabbed { target_id, .. }
            | Self::GrabFailed { target_id, .. }
            | Self::ImportDecided { target_id, .. }
            | Self::FileImported { target_id, .. }
            | Self::FileUpgraded { target_id, .. }
            | Self::ImportFailed { target_id, .. }
            | Self::DownloadFailed { target_id, .. } => Some(target_id),
            Self::RequestStatusChanged { catalog_id, .. } => Some(catalog_id),
        }
    }
}

/// A stored history record with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub media_id: Option<String>,
    pub data: HistoryEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_media_id() {
        let event = HistoryEvent::Grabbed {
            target_id: "m1".into(),
            slot_id: "hd".into(),
            grab_id: "g1".into(),
            release_title: "Arrival.2016.1080p.WEB-DL".into(),
            quality: "1080p WEB-DL".into(),
            client: "qbit".into(),
            job_id: "abc".into(),
        };
        assert_eq!(event.event_type(), "grabbed");
        assert_eq!(event.media_id(), Some("m1"));

        let event = HistoryEvent::ServiceStopped {
            reason: "shutdown".into(),
        };
        assert_eq!(event.media_id(), None);

        let event = HistoryEvent::RequestStatusChanged {
            request_id: "r1".into(),
            catalog_id: "tt1".into(),
            from: "approved".into(),
            to: "available".into(),
        };
        assert_eq!(event.media_id(), Some("tt1"));
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = HistoryEvent::ImportFailed {
            target_id: "m1".into(),
            grab_id: "g1".into(),
            stage: "probe".into(),
            error: "unreadable".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "import_failed");
        let back: HistoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
