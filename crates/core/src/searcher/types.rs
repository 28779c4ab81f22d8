//! Types for the release search system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::library::{MediaKind, MediaTarget};
use crate::quality::ParsedQuality;

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query sent to sources.
    pub text: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

impl SearchQuery {
    /// Build a query for a media target, optionally with a better title
    /// from a metadata lookup.
    pub fn for_target(target: &MediaTarget, title_override: Option<&str>) -> Self {
        let title = title_override.unwrap_or(&target.title);
        let text = match (target.kind, target.season, target.episode) {
            (MediaKind::Episode, Some(s), Some(e)) => format!("{} S{:02}E{:02}", title, s, e),
            _ => match target.year {
                Some(year) => format!("{} {}", title, year),
                None => title.to_string(),
            },
        };

        Self {
            text,
            kind: target.kind,
            catalog_id: Some(target.catalog_id.clone()),
            year: target.year,
            season: target.season,
            episode: target.episode,
        }
    }

    /// Plain free-text query.
    pub fn text(text: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            text: text.into(),
            kind,
            catalog_id: None,
            year: None,
            season: None,
            episode: None,
        }
    }
}

/// Which class of sources a search fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Query the aggregator sources, which search many sites per request.
    Aggregator,
    /// Query each directly configured source.
    #[default]
    Direct,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Aggregator => "aggregator",
            RoutingMode::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Aggregator,
    Direct,
}

impl SourceKind {
    pub fn serves(&self, mode: RoutingMode) -> bool {
        matches!(
            (self, mode),
            (SourceKind::Aggregator, RoutingMode::Aggregator)
                | (SourceKind::Direct, RoutingMode::Direct)
        )
    }
}

/// One result as returned by a single source, before merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRelease {
    pub title: String,
    pub source: String,
    pub size_bytes: u64,
    pub magnet_uri: Option<String>,
    pub download_url: Option<String>,
    pub info_hash: Option<String>,
    pub seeders: u32,
    pub publish_date: Option<DateTime<Utc>>,
}

/// A merged search result with parsed quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRelease {
    pub title: String,
    pub size_bytes: u64,
    /// Source that listed this release first.
    pub source: String,
    /// Other sources listing the same release.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_seen_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Info hash (lowercase hex), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    /// Highest seeder count reported by any source.
    pub seeders: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    pub quality: ParsedQuality,
}

impl CandidateRelease {
    /// Link to hand to a download client, magnet preferred.
    pub fn download_link(&self) -> Option<&str> {
        self.magnet_uri
            .as_deref()
            .or(self.download_url.as_deref())
    }
}

/// A source skipped because its budget was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitedSource {
    pub source: String,
    pub retry_after_ms: u64,
}

/// Result of one routed search. An empty candidate list is a normal
/// outcome, even when every source failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub query: SearchQuery,
    pub mode: RoutingMode,
    pub candidates: Vec<CandidateRelease>,
    /// Sources that were actually called.
    pub sources_queried: Vec<String>,
    /// Sources that failed or timed out (name -> error message).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub source_errors: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rate_limited: Vec<RateLimitedSource>,
    pub duration_ms: u64,
}

/// Errors that can occur while querying a single source.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search source connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Search source API error: {0}")]
    ApiError(String),

    #[error("Rate limited by source, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Capability to search one release source.
#[async_trait]
pub trait SourceSearch: Send + Sync {
    /// Source name, unique across configured sources.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawRelease>, SearchError>;
}
