use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::library::LibraryError;
use crate::metadata::MetadataError;

/// Fulfillment state of an external request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Searching,
    PartiallyAvailable,
    Available,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Searching => "searching",
            RequestStatus::PartiallyAvailable => "partially_available",
            RequestStatus::Available => "available",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "searching" => Some(RequestStatus::Searching),
            "partially_available" => Some(RequestStatus::PartiallyAvailable),
            "available" => Some(RequestStatus::Available),
            "failed" => Some(RequestStatus::Failed),
            _ => None,
        }
    }

    /// Requests the tracker still recomputes.
    pub fn is_open(&self) -> bool {
        !matches!(self, RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    Movie,
    /// A series restricted to the given seasons. An empty set asks for
    /// every season the library knows about.
    Series { seasons: BTreeSet<u32> },
}

/// An externally submitted acquisition intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub catalog_id: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn movie(id: impl Into<String>, catalog_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, catalog_id, title, RequestKind::Movie)
    }

    pub fn series(
        id: impl Into<String>,
        catalog_id: impl Into<String>,
        title: impl Into<String>,
        seasons: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self::new(
            id,
            catalog_id,
            title,
            RequestKind::Series {
                seasons: seasons.into_iter().collect(),
            },
        )
    }

    fn new(
        id: impl Into<String>,
        catalog_id: impl Into<String>,
        title: impl Into<String>,
        kind: RequestKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            catalog_id: catalog_id.into(),
            title: title.into(),
            kind,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = status;
        self
    }
}

/// A change to library state that may affect request fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LibraryChange {
    FileAdded { target_id: String, catalog_id: String },
    MonitoringChanged { target_id: String, catalog_id: String },
    /// New episodes of a series were added to the library.
    EpisodesAdded { catalog_id: String, target_ids: Vec<String> },
}

impl LibraryChange {
    pub fn catalog_id(&self) -> &str {
        match self {
            LibraryChange::FileAdded { catalog_id, .. }
            | LibraryChange::MonitoringChanged { catalog_id, .. }
            | LibraryChange::EpisodesAdded { catalog_id, .. } => catalog_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LibraryChange::FileAdded { .. } => "file_added",
            LibraryChange::MonitoringChanged { .. } => "monitoring_changed",
            LibraryChange::EpisodesAdded { .. } => "episodes_added",
        }
    }
}

/// A request status change made by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub request_id: String,
    pub catalog_id: String,
    pub from: RequestStatus,
    pub to: RequestStatus,
}

/// Result of a full availability refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub requests_checked: usize,
    pub episodes_added: usize,
    pub transitions: Vec<StatusTransition>,
    /// Catalog ids whose metadata lookup failed.
    pub lookup_failures: Vec<String>,
}

impl RefreshReport {
    pub fn summary(&self) -> String {
        format!(
            "{} requests checked, {} status changes, {} episodes added, {} lookup failures",
            self.requests_checked,
            self.transitions.len(),
            self.episodes_added,
            self.lookup_failures.len()
        )
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),
}
