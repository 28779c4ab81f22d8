use chrono::{DateTime, Utc};
use thiserror::Error;

use super::HistoryRecord;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying history
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub media_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_media_id(mut self, media_id: impl Into<String>) -> Self {
        self.media_id = Some(media_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for history storage
pub trait HistoryStore: Send + Sync {
    /// Insert a record, returns the assigned ID
    fn insert(&self, record: &HistoryRecord) -> Result<i64, HistoryError>;

    /// Query records, oldest first
    fn query(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, HistoryError>;

    fn count(&self, filter: &HistoryFilter) -> Result<i64, HistoryError>;
}
