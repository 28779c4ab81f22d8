use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::quality::ParsedQuality;
use crate::slots::SlotOverride;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Episode,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "episode" => Some(MediaKind::Episode),
            _ => None,
        }
    }
}

/// A movie or a single episode the library wants files for.
///
/// `catalog_id` is the external catalog identity. Episodes carry the
/// catalog id of their series plus season/episode numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTarget {
    pub id: String,
    pub catalog_id: String,
    pub kind: MediaKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    pub monitored: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slot_overrides: Vec<SlotOverride>,
}

impl MediaTarget {
    pub fn movie(
        id: impl Into<String>,
        catalog_id: impl Into<String>,
        title: impl Into<String>,
        year: Option<u16>,
    ) -> Self {
        Self {
            id: id.into(),
            catalog_id: catalog_id.into(),
            kind: MediaKind::Movie,
            title: title.into(),
            year,
            season: None,
            episode: None,
            monitored: true,
            slot_overrides: Vec::new(),
        }
    }

    pub fn episode(
        id: impl Into<String>,
        series_catalog_id: impl Into<String>,
        series_title: impl Into<String>,
        season: u32,
        episode: u32,
    ) -> Self {
        Self {
            id: id.into(),
            catalog_id: series_catalog_id.into(),
            kind: MediaKind::Episode,
            title: series_title.into(),
            year: None,
            season: Some(season),
            episode: Some(episode),
            monitored: true,
            slot_overrides: Vec::new(),
        }
    }
}

impl fmt::Display for MediaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.season, self.episode) {
            (MediaKind::Episode, Some(s), Some(e)) => {
                write!(f, "{} S{:02}E{:02}", self.title, s, e)
            }
            _ => match self.year {
                Some(year) => write!(f, "{} ({})", self.title, year),
                None => f.write_str(&self.title),
            },
        }
    }
}

/// A file held in the library for one slot of a media target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFile {
    pub target_id: String,
    pub slot_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub quality: ParsedQuality,
    pub release_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grab_id: Option<String>,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Media target not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}
