//! Quality attributes and profiles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vertical resolution class of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    R480,
    #[serde(rename = "576p")]
    R576,
    #[serde(rename = "720p")]
    R720,
    #[serde(rename = "1080p")]
    R1080,
    #[serde(rename = "2160p")]
    R2160,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::R480 => "480p",
            Resolution::R576 => "576p",
            Resolution::R720 => "720p",
            Resolution::R1080 => "1080p",
            Resolution::R2160 => "2160p",
        }
    }

    /// Classify a pixel height as reported by a media probe.
    pub fn from_height(height: u32) -> Option<Self> {
        match height {
            0 => None,
            1..=480 => Some(Resolution::R480),
            481..=576 => Some(Resolution::R576),
            577..=720 => Some(Resolution::R720),
            721..=1080 => Some(Resolution::R1080),
            _ => Some(Resolution::R2160),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a release was captured or ripped from, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Cam,
    Telesync,
    Dvd,
    Hdtv,
    WebRip,
    WebDl,
    Bluray,
    Remux,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Cam => "CAM",
            SourceType::Telesync => "TS",
            SourceType::Dvd => "DVD",
            SourceType::Hdtv => "HDTV",
            SourceType::WebRip => "WEBRip",
            SourceType::WebDl => "WEB-DL",
            SourceType::Bluray => "BluRay",
            SourceType::Remux => "Remux",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
    Xvid,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "x264",
            VideoCodec::H265 => "x265",
            VideoCodec::Av1 => "AV1",
            VideoCodec::Xvid => "XviD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrFormat {
    Hdr10,
    Hdr10Plus,
    DolbyVision,
    Hlg,
}

impl HdrFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrFormat::Hdr10 => "HDR10",
            HdrFormat::Hdr10Plus => "HDR10+",
            HdrFormat::DolbyVision => "DV",
            HdrFormat::Hlg => "HLG",
        }
    }
}

/// Quality attributes extracted from a release title (or a media probe).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuality {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdr: Option<HdrFormat>,
    #[serde(default)]
    pub proper: bool,
    #[serde(default)]
    pub repack: bool,
}

impl ParsedQuality {
    /// A release without a recognizable resolution cannot be placed in any tier.
    pub fn is_recognized(&self) -> bool {
        self.resolution.is_some()
    }

    /// Revision counter used as a tie-break: PROPER/REPACK releases fix a
    /// broken earlier release of the same quality.
    pub fn revision(&self) -> u8 {
        u8::from(self.proper || self.repack)
    }
}

impl fmt::Display for ParsedQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(r) = self.resolution {
            parts.push(r.as_str());
        }
        if let Some(s) = self.source {
            parts.push(s.as_str());
        }
        if let Some(c) = self.codec {
            parts.push(c.as_str());
        }
        if let Some(h) = self.hdr {
            parts.push(h.as_str());
        }
        if self.proper {
            parts.push("PROPER");
        }
        if self.repack {
            parts.push("REPACK");
        }
        if parts.is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

/// One acceptable quality level within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub name: String,
    pub resolution: Resolution,
    /// Accepted source types. Empty accepts any source, including unknown.
    #[serde(default)]
    pub sources: Vec<SourceType>,
}

impl QualityTier {
    pub fn matches(&self, quality: &ParsedQuality) -> bool {
        if quality.resolution != Some(self.resolution) {
            return false;
        }
        if self.sources.is_empty() {
            return true;
        }
        quality
            .source
            .map(|s| self.sources.contains(&s))
            .unwrap_or(false)
    }
}

/// Ordered set of acceptable tiers (best first) with a cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub id: String,
    pub name: String,
    pub tiers: Vec<QualityTier>,
    /// Name of the tier at which a slot counts as satisfied.
    pub cutoff: String,
    #[serde(default = "default_true")]
    pub upgrades_allowed: bool,
    /// Prefer HDR releases when everything else ties.
    #[serde(default)]
    pub prefer_hdr: bool,
}

fn default_true() -> bool {
    true
}

impl QualityProfile {
    /// Rank of the first tier matching `quality`. Unmatched releases rank 0.
    pub fn rank_of(&self, quality: &ParsedQuality) -> QualityRank {
        self.tiers
            .iter()
            .position(|t| t.matches(quality))
            .map(|idx| self.rank_at(idx))
            .unwrap_or(QualityRank::UNRANKED)
    }

    /// Rank of the cutoff tier, or `None` if the cutoff names no tier.
    pub fn cutoff_rank(&self) -> Option<QualityRank> {
        self.tiers
            .iter()
            .position(|t| t.name == self.cutoff)
            .map(|idx| self.rank_at(idx))
    }

    /// Tier holding `rank`.
    pub fn tier(&self, rank: QualityRank) -> Option<&QualityTier> {
        if rank.is_unranked() || rank.0 as usize > self.tiers.len() {
            return None;
        }
        self.tiers.get(self.tiers.len() - rank.0 as usize)
    }

    fn rank_at(&self, idx: usize) -> QualityRank {
        QualityRank((self.tiers.len() - idx) as u32)
    }
}

/// Position of a release within a profile. Higher is better; 0 is unranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityRank(pub u32);

impl QualityRank {
    pub const UNRANKED: QualityRank = QualityRank(0);

    pub fn is_unranked(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for QualityRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> QualityProfile {
        QualityProfile {
            id: "hd".into(),
            name: "HD".into(),
            tiers: vec![
                QualityTier {
                    name: "bluray-1080p".into(),
                    resolution: Resolution::R1080,
                    sources: vec![SourceType::Bluray, SourceType::Remux],
                },
                QualityTier {
                    name: "web-1080p".into(),
                    resolution: Resolution::R1080,
                    sources: vec![SourceType::WebDl, SourceType::WebRip],
                },
                QualityTier {
                    name: "any-720p".into(),
                    resolution: Resolution::R720,
                    sources: vec![],
                },
            ],
            cutoff: "web-1080p".into(),
            upgrades_allowed: true,
            prefer_hdr: false,
        }
    }

    fn quality(res: Resolution, source: Option<SourceType>) -> ParsedQuality {
        ParsedQuality {
            resolution: Some(res),
            source,
            ..Default::default()
        }
    }

    #[test]
    fn test_rank_follows_tier_order() {
        let p = profile();
        assert_eq!(
            p.rank_of(&quality(Resolution::R1080, Some(SourceType::Bluray))),
            QualityRank(3)
        );
        assert_eq!(
            p.rank_of(&quality(Resolution::R1080, Some(SourceType::WebDl))),
            QualityRank(2)
        );
        assert_eq!(p.rank_of(&quality(Resolution::R720, None)), QualityRank(1));
    }

    #[test]
    fn test_unmatched_is_unranked() {
        let p = profile();
        assert!(p
            .rank_of(&quality(Resolution::R2160, Some(SourceType::WebDl)))
            .is_unranked());
        assert!(p
            .rank_of(&quality(Resolution::R1080, Some(SourceType::Hdtv)))
            .is_unranked());
        assert!(p.rank_of(&ParsedQuality::default()).is_unranked());
    }

    #[test]
    fn test_tier_with_sources_requires_known_source() {
        let p = profile();
        assert!(p.rank_of(&quality(Resolution::R1080, None)).is_unranked());
    }

    #[test]
    fn test_cutoff_rank_and_tier_lookup() {
        let p = profile();
        assert_eq!(p.cutoff_rank(), Some(QualityRank(2)));
        assert_eq!(p.tier(QualityRank(2)).unwrap().name, "web-1080p");
        assert_eq!(p.tier(QualityRank(3)).unwrap().name, "bluray-1080p");
        assert!(p.tier(QualityRank(0)).is_none());
        assert!(p.tier(QualityRank(9)).is_none());
    }

    #[test]
    fn test_display() {
        let q = ParsedQuality {
            resolution: Some(Resolution::R2160),
            source: Some(SourceType::WebDl),
            codec: Some(VideoCodec::H265),
            hdr: Some(HdrFormat::DolbyVision),
            proper: true,
            repack: false,
        };
        assert_eq!(q.to_string(), "2160p WEB-DL x265 DV PROPER");
        assert_eq!(ParsedQuality::default().to_string(), "unknown");
    }

    #[test]
    fn test_profile_deserialize() {
        let toml = r#"
id = "uhd"
name = "UHD"
cutoff = "web-2160p"

[[tiers]]
name = "web-2160p"
resolution = "2160p"
sources = ["webdl", "webrip"]
"#;
        let p: QualityProfile = toml::from_str(toml).unwrap();
        assert!(p.upgrades_allowed);
        assert!(!p.prefer_hdr);
        assert_eq!(p.tiers[0].resolution, Resolution::R2160);
        assert_eq!(p.tiers[0].sources, vec![SourceType::WebDl, SourceType::WebRip]);
    }

    #[test]
    fn test_resolution_from_height() {
        assert_eq!(Resolution::from_height(1080), Some(Resolution::R1080));
        assert_eq!(Resolution::from_height(800), Some(Resolution::R1080));
        assert_eq!(Resolution::from_height(2160), Some(Resolution::R2160));
        assert_eq!(Resolution::from_height(0), None);
    }
}
