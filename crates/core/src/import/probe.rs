//! Technical attributes of downloaded files.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::quality::{HdrFormat, ParsedQuality, Resolution, VideoCodec};

/// What a media probe could read from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdr: Option<HdrFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl MediaAttributes {
    /// Overlay probed attributes on title-derived quality. Whatever the
    /// probe measured wins; the capture source only comes from the title.
    pub fn apply_to(&self, quality: &ParsedQuality) -> ParsedQuality {
        let mut merged = quality.clone();
        if let Some(resolution) = self.height.and_then(Resolution::from_height) {
            merged.resolution = Some(resolution);
        }
        if self.codec.is_some() {
            merged.codec = self.codec;
        }
        if self.hdr.is_some() {
            merged.hdr = self.hdr;
        }
        merged
    }
}

/// Capability to inspect a media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// `Ok(None)` means no probe is available for the file; an error means
    /// probing was attempted and failed.
    async fn probe(&self, path: &Path) -> Result<Option<MediaAttributes>, String>;
}

/// Probe that never has anything to report.
#[derive(Debug, Clone, Default)]
pub struct NullProbe;

#[async_trait]
impl MediaProbe for NullProbe {
    async fn probe(&self, _path: &Path) -> Result<Option<MediaAttributes>, String> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{parse_quality, SourceType};

    #[test]
    fn test_probe_overrides_title() {
        let title = parse_quality("Movie.2020.720p.WEB-DL.x264");
        let probed = MediaAttributes {
            width: Some(1920),
            height: Some(1080),
            codec: Some(VideoCodec::H265),
            ..Default::default()
        };

        let merged = probed.apply_to(&title);
        assert_eq!(merged.resolution, Some(Resolution::R1080));
        assert_eq!(merged.codec, Some(VideoCodec::H265));
        assert_eq!(merged.source, Some(SourceType::WebDl));
        assert_eq!(merged.hdr, None);
    }

    #[test]
    fn test_empty_probe_keeps_title() {
        let title = parse_quality("Movie.2020.2160p.BluRay.HDR");
        assert_eq!(MediaAttributes::default().apply_to(&title), title);
    }

    #[tokio::test]
    async fn test_null_probe_unavailable() {
        assert_eq!(NullProbe.probe(Path::new("/x.mkv")).await.unwrap(), None);
    }
}
