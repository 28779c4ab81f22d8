//! Metadata lookup capability.
//!
//! The core only reads titles, years and episode structure through this
//! trait; concrete providers live outside the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonMetadata {
    pub number: u32,
    pub episodes: Vec<EpisodeMetadata>,
}

/// What a provider knows about a catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub catalog_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    /// Empty for movies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seasons: Vec<SeasonMetadata>,
}

impl MediaMetadata {
    pub fn season(&self, number: u32) -> Option<&SeasonMetadata> {
        self.seasons.iter().find(|s| s.number == number)
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Catalog id not found: {0}")]
    NotFound(String),

    #[error("Metadata provider connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Metadata provider API error: {0}")]
    ApiError(String),
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self, catalog_id: &str) -> Result<MediaMetadata, MetadataError>;
}
