//! Testing utilities and mock implementations.
//!
//! Mocks for every capability trait plus fixtures that build consistent
//! test data, so pipeline components can be wired together without real
//! sources, download clients or metadata providers.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester_core::testing::{fixtures, MockDownloadClient, MockSource};
//!
//! let source = MockSource::new("idx", SourceKind::Direct);
//! source.add_release(fixtures::raw_release("Some.Movie.2021.1080p.WEB-DL", "idx", 4_000));
//!
//! let client = MockDownloadClient::new("qbit");
//! // ... grab, then drive the job:
//! client.complete(&record.job_id, download_dir);
//! ```

mod mock_collaborators;
mod mock_download_client;
mod mock_source;

pub use mock_collaborators::{MockMetadata, MockOrganizer, MockProbe, RecordingEventSink};
pub use mock_download_client::MockDownloadClient;
pub use mock_source::MockSource;

/// Test fixtures and helper functions.
///
/// All fixtures agree with each other: slot `hd` uses profile `hd`, slot
/// `uhd` uses profile `uhd`, and [`fixtures::movie_target`] builds
/// "Some Movie (2021)" with catalog id `tt-<id>`.
pub mod fixtures {
    use chrono::{DateTime, Utc};

    use crate::config::{JackettConfig, RateLimitConfig, SourceBackend, SourceConfig};
    use crate::download_client::{QueueItem, QueueStatus};
    use crate::grab::{GrabRecord, ReleaseSnapshot};
    use crate::library::MediaTarget;
    use crate::quality::{parse_quality, QualityProfile, QualityTier, Resolution, SourceType};
    use crate::searcher::{CandidateRelease, RawRelease, SourceKind};
    use crate::slots::{Slot, SlotSnapshot};

    /// A Jackett-backed source with default rate limits.
    pub fn source_config(name: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            kind,
            backend: SourceBackend::Jackett,
            enabled: true,
            rate_limit: RateLimitConfig::default(),
            timeout_ms: None,
            jackett: Some(JackettConfig {
                url: "http://localhost:9117".to_string(),
                api_key: "test-api-key".to_string(),
                indexer: "all".to_string(),
            }),
        }
    }

    fn magnet(title: &str) -> String {
        format!("magnet:?dn={}", urlencoding::encode(title))
    }

    /// A release as one source would return it.
    pub fn raw_release(title: &str, source: &str, size_bytes: u64) -> RawRelease {
        RawRelease {
            title: title.to_string(),
            source: source.to_string(),
            size_bytes,
            magnet_uri: Some(magnet(title)),
            download_url: None,
            info_hash: None,
            seeders: 25,
            publish_date: None,
        }
    }

    /// A merged candidate with quality parsed from its title.
    pub fn candidate(title: &str, size_bytes: u64, source: &str) -> CandidateRelease {
        CandidateRelease {
            title: title.to_string(),
            size_bytes,
            source: source.to_string(),
            also_seen_on: Vec::new(),
            magnet_uri: Some(magnet(title)),
            download_url: None,
            info_hash: None,
            seeders: 25,
            publish_date: None,
            quality: parse_quality(title),
        }
    }

    /// "Some Movie (2021)", monitored, catalog id `tt-<id>`.
    pub fn movie_target(id: &str) -> MediaTarget {
        MediaTarget::movie(id, format!("tt-{}", id), "Some Movie", Some(2021))
    }

    /// `hd` (order 0, profile `hd`) and `uhd` (order 1, profile `uhd`).
    pub fn slots() -> Vec<Slot> {
        vec![
            Slot {
                id: "hd".to_string(),
                name: "HD".to_string(),
                enabled: true,
                profile_id: "hd".to_string(),
                order: 0,
            },
            Slot {
                id: "uhd".to_string(),
                name: "UHD".to_string(),
                enabled: true,
                profile_id: "uhd".to_string(),
                order: 1,
            },
        ]
    }

    fn tier(name: &str, resolution: Resolution, sources: &[SourceType]) -> QualityTier {
        QualityTier {
            name: name.to_string(),
            resolution,
            sources: sources.to_vec(),
        }
    }

    /// Profile `hd` (BluRay 1080p > WEB 1080p > WEB 720p > HDTV 720p, cutoff
    /// at BluRay 1080p) and profile `uhd` (any 2160p).
    pub fn profiles() -> Vec<QualityProfile> {
        vec![
            QualityProfile {
                id: "hd".to_string(),
                name: "HD".to_string(),
                tiers: vec![
                    tier("bluray-1080p", Resolution::R1080, &[SourceType::Bluray, SourceType::Remux]),
                    tier("web-1080p", Resolution::R1080, &[SourceType::WebDl, SourceType::WebRip]),
                    tier("web-720p", Resolution::R720, &[SourceType::WebDl, SourceType::WebRip]),
                    tier("hdtv-720p", Resolution::R720, &[SourceType::Hdtv]),
                ],
                cutoff: "bluray-1080p".to_string(),
                upgrades_allowed: true,
                prefer_hdr: false,
            },
            QualityProfile {
                id: "uhd".to_string(),
                name: "Ultra HD".to_string(),
                tiers: vec![tier("2160p", Resolution::R2160, &[])],
                cutoff: "2160p".to_string(),
                upgrades_allowed: true,
                prefer_hdr: true,
            },
        ]
    }

    /// Grab of a 1080p WEB-DL release for `slot_id`, taken 2024-01-01.
    pub fn grab_record(id: &str, target_id: &str, slot_id: &str, client: &str, job_id: &str) -> GrabRecord {
        let slot = slots()
            .into_iter()
            .find(|s| s.id == slot_id)
            .map(|s| SlotSnapshot::from(&s))
            .unwrap_or_else(|| SlotSnapshot {
                slot_id: slot_id.to_string(),
                slot_name: slot_id.to_uppercase(),
                profile_id: slot_id.to_string(),
            });
        let title = "Some.Movie.2021.1080p.WEB-DL.x264-GRP";

        GrabRecord {
            id: id.to_string(),
            target_id: target_id.to_string(),
            slot,
            release: ReleaseSnapshot {
                title: title.to_string(),
                size_bytes: 4_000_000_000,
                source: "idx".to_string(),
                info_hash: None,
                quality: parse_quality(title),
            },
            client: client.to_string(),
            job_id: job_id.to_string(),
            grabbed_at: DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default(),
        }
    }

    /// A job in the given state; completed jobs report full progress.
    pub fn queue_item(client: &str, job_id: &str, status: QueueStatus) -> QueueItem {
        let size_bytes = 4_000_000_000;
        let progress = match status {
            QueueStatus::Completed => 1.0,
            QueueStatus::Queued => 0.0,
            _ => 0.5,
        };
        QueueItem {
            client: client.to_string(),
            job_id: job_id.to_string(),
            name: job_id.to_string(),
            status,
            progress,
            size_bytes,
            downloaded_bytes: (size_bytes as f64 * progress) as u64,
            download_speed: if status == QueueStatus::Downloading { 1_000_000 } else { 0 },
            eta_secs: None,
            save_path: None,
            content_path: None,
            error: None,
        }
    }
}
