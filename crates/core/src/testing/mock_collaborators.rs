//! Mocks for the smaller capability traits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::events::{EventSink, PipelineEvent};
use crate::import::{IncomingFile, MediaAttributes, MediaProbe, Organizer};
use crate::library::MediaTarget;
use crate::metadata::{
    EpisodeMetadata, MediaMetadata, MetadataError, MetadataProvider, SeasonMetadata,
};

use super::mock_source::lock;

/// Event sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: PipelineEvent) {
        lock(&self.events).push(event);
    }
}

/// Probe reporting a configurable height, or nothing until one is set.
#[derive(Default)]
pub struct MockProbe {
    height: Mutex<Option<u32>>,
    error: Mutex<Option<String>>,
    probed: Mutex<Vec<PathBuf>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&self, height: u32) {
        *lock(&self.height) = Some(height);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *lock(&self.error) = Some(message.into());
    }

    /// Paths probed so far.
    pub fn probed(&self) -> Vec<PathBuf> {
        lock(&self.probed).clone()
    }
}

#[async_trait]
impl MediaProbe for MockProbe {
    async fn probe(&self, path: &Path) -> Result<Option<MediaAttributes>, String> {
        lock(&self.probed).push(path.to_path_buf());
        if let Some(message) = lock(&self.error).clone() {
            return Err(message);
        }
        Ok(lock(&self.height).map(|height| MediaAttributes {
            height: Some(height),
            ..Default::default()
        }))
    }
}

/// Organizer placing every file at `<root>/<target id>/<slot id>.<ext>`.
#[derive(Default)]
pub struct MockOrganizer {
    calls: AtomicUsize,
}

impl MockOrganizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Organizer for MockOrganizer {
    fn destination_path(&self, library_root: &Path, target: &MediaTarget, file: &IncomingFile<'_>) -> PathBuf {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = match file.extension() {
            Some(ext) => format!("{}.{}", file.slot_id, ext),
            None => file.slot_id.to_string(),
        };
        library_root.join(&target.id).join(name)
    }
}

/// Metadata provider answering from an in-memory table.
#[derive(Default)]
pub struct MockMetadata {
    entries: Mutex<HashMap<String, MediaMetadata>>,
    error: Mutex<Option<String>>,
    lookups: AtomicUsize,
}

impl MockMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_movie(&self, catalog_id: &str, title: &str, year: Option<u16>) {
        lock(&self.entries).insert(
            catalog_id.to_string(),
            MediaMetadata {
                catalog_id: catalog_id.to_string(),
                title: title.to_string(),
                year,
                seasons: Vec::new(),
            },
        );
    }

    /// Register a series; `seasons` lists (season number, episode count).
    pub fn add_series(&self, catalog_id: &str, title: &str, seasons: &[(u32, u32)]) {
        let seasons = seasons
            .iter()
            .map(|&(number, episodes)| SeasonMetadata {
                number,
                episodes: (1..=episodes)
                    .map(|e| EpisodeMetadata {
                        number: e,
                        title: Some(format!("Episode {}", e)),
                    })
                    .collect(),
            })
            .collect();
        lock(&self.entries).insert(
            catalog_id.to_string(),
            MediaMetadata {
                catalog_id: catalog_id.to_string(),
                title: title.to_string(),
                year: None,
                seasons,
            },
        );
    }

    /// Fail every lookup with a connection error.
    pub fn set_error(&self, message: impl Into<String>) {
        *lock(&self.error) = Some(message.into());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for MockMetadata {
    fn name(&self) -> &str {
        "mock"
    }

    async fn lookup(&self, catalog_id: &str) -> Result<MediaMetadata, MetadataError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.error).clone() {
            return Err(MetadataError::ConnectionFailed(message));
        }
        lock(&self.entries)
            .get(catalog_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(catalog_id.to_string()))
    }
}
