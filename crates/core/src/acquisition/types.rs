use serde::Serialize;
use thiserror::Error;

use crate::grab::GrabStoreError;
use crate::library::LibraryError;
use crate::searcher::RoutingMode;
use crate::slots::SlotAssignment;

/// Who asked for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTrigger {
    /// A user searched this target. Ignores the grab retry budget.
    Manual,
    /// The autosearch sweep.
    Autosearch,
}

impl SearchTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTrigger::Manual => "manual",
            SearchTrigger::Autosearch => "autosearch",
        }
    }
}

/// What happened when a chosen candidate was handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GrabAttempt {
    Grabbed { grab_id: String, release_title: String },
    Failed { release_title: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotGrab {
    pub slot_id: String,
    #[serde(flatten)]
    pub attempt: GrabAttempt,
}

/// Outcome of searching one media target.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub target_id: String,
    pub trigger: SearchTrigger,
    pub mode: RoutingMode,
    /// `None` when no slot wanted a file, so no source was queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub candidates: usize,
    pub assignment: SlotAssignment,
    pub grabs: Vec<SlotGrab>,
    /// Slots left out because their failed-grab budget is spent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exhausted_slots: Vec<String>,
}

impl SearchReport {
    pub fn searched(&self) -> bool {
        self.query.is_some()
    }

    pub fn grabbed(&self) -> usize {
        self.grabs
            .iter()
            .filter(|g| matches!(g.attempt, GrabAttempt::Grabbed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.grabs.len() - self.grabbed()
    }
}

/// Totals of one autosearch sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub targets: usize,
    pub searched: usize,
    pub grabbed: usize,
    pub grab_failures: usize,
    /// Targets that could not be searched (target id -> error).
    pub errors: Vec<(String, String)>,
}

impl SweepReport {
    pub fn summary(&self) -> String {
        format!(
            "{} targets, {} searched, {} grabbed, {} grab failures, {} errors",
            self.targets,
            self.searched,
            self.grabbed,
            self.grab_failures,
            self.errors.len()
        )
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Media target not found: {0}")]
    TargetNotFound(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Grab store error: {0}")]
    Grabs(#[from] GrabStoreError),
}
