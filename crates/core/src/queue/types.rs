use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::download_client::{DownloadClientError, QueueItem};

/// A client that could not be polled this tick. Its jobs are omitted from
/// the snapshot, not treated as removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreachableClient {
    pub client: String,
    pub error: String,
}

/// Every client's queue at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    pub items: Vec<QueueItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreachable: Vec<UnreachableClient>,
}

impl QueueSnapshot {
    pub fn completed(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter().filter(|i| i.is_completed())
    }

    pub fn is_reachable(&self, client: &str) -> bool {
        !self.unreachable.iter().any(|u| u.client == client)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown download client: {0}")]
    UnknownClient(String),

    #[error(transparent)]
    Client(#[from] DownloadClientError),
}
