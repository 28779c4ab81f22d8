//! Release title parsing.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::types::{HdrFormat, ParsedQuality, Resolution, SourceType, VideoCodec};

static RESOLUTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(2160p|4k|uhd|1080[pi]|720p|576p|480p)\b").expect("valid regex")
});

// Checked in order; the first match wins.
static SOURCE_RES: Lazy<Vec<(SourceType, Regex)>> = Lazy::new(|| {
    [
        (SourceType::Remux, r"(?i)\b(bd)?remux\b"),
        (SourceType::Bluray, r"(?i)\b(blu-?ray|bdrip|brrip|bd25|bd50)\b"),
        (SourceType::WebRip, r"(?i)\bweb-?rip\b"),
        (SourceType::WebDl, r"(?i)\b(web-?dl|web|amzn|dsnp|hmax|atvp)\b"),
        (SourceType::Hdtv, r"(?i)\b(hdtv|pdtv|dsr)\b"),
        (SourceType::Dvd, r"(?i)\b(dvd-?rip|dvdr|dvd)\b"),
        (SourceType::Telesync, r"(?i)\b(telesync|hdts|ts|telecine|tc)\b"),
        (SourceType::Cam, r"(?i)\b(hdcam|camrip|cam)\b"),
    ]
    .into_iter()
    .map(|(source, pattern)| (source, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static CODEC_RES: Lazy<Vec<(VideoCodec, Regex)>> = Lazy::new(|| {
    [
        (VideoCodec::H265, r"(?i)\b([xh] ?265|hevc)\b"),
        (VideoCodec::H264, r"(?i)\b([xh] ?264|avc)\b"),
        (VideoCodec::Av1, r"(?i)\bav1\b"),
        (VideoCodec::Xvid, r"(?i)\bxvid\b"),
    ]
    .into_iter()
    .map(|(codec, pattern)| (codec, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static HDR_RES: Lazy<Vec<(HdrFormat, Regex)>> = Lazy::new(|| {
    [
        (HdrFormat::DolbyVision, r"(?i)\b(dv|dovi|dolby ?vision)\b"),
        (HdrFormat::Hdr10Plus, r"(?i)\bhdr10(\+|plus)"),
        (HdrFormat::Hdr10, r"(?i)\bhdr(10)?\b"),
        (HdrFormat::Hlg, r"(?i)\bhlg\b"),
    ]
    .into_iter()
    .map(|(hdr, pattern)| (hdr, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static PROPER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bproper\b").expect("valid regex"));
static REPACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(repack|rerip)\b").expect("valid regex"));

/// Extract quality attributes from a release title or file name.
///
/// Unrecognized titles yield a `ParsedQuality` with no resolution, which
/// ranks lowest under every profile.
pub fn parse_quality(title: &str) -> ParsedQuality {
    let normalized: String = title
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let mut quality = ParsedQuality::default();

    if let Some(caps) = RESOLUTION_RE.captures(&normalized) {
        quality.resolution = match caps[1].to_ascii_lowercase().as_str() {
            "2160p" | "4k" | "uhd" => Some(Resolution::R2160),
            "1080p" | "1080i" => Some(Resolution::R1080),
            "720p" => Some(Resolution::R720),
            "576p" => Some(Resolution::R576),
            "480p" => Some(Resolution::R480),
            _ => None,
        };
    }

    quality.source = SOURCE_RES
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map(|(source, _)| *source);

    quality.codec = CODEC_RES
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map(|(codec, _)| *codec);

    quality.hdr = HDR_RES
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map(|(hdr, _)| *hdr);

    quality.proper = PROPER_RE.is_match(&normalized);
    quality.repack = REPACK_RE.is_match(&normalized);

    // DVD rips rarely state a resolution.
    if quality.resolution.is_none() && quality.source == Some(SourceType::Dvd) {
        quality.resolution = Some(Resolution::R480);
    }

    quality
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_web_release() {
        let q = parse_quality("Some.Movie.2021.1080p.WEB-DL.DDP5.1.H.264-GROUP");
        assert_eq!(q.resolution, Some(Resolution::R1080));
        assert_eq!(q.source, Some(SourceType::WebDl));
        assert_eq!(q.codec, Some(VideoCodec::H264));
        assert_eq!(q.hdr, None);
        assert!(!q.proper);
    }

    #[test]
    fn test_parse_uhd_hdr() {
        let q = parse_quality("Some Movie 2021 2160p UHD BluRay x265 HDR10+ DTS-HD");
        assert_eq!(q.resolution, Some(Resolution::R2160));
        assert_eq!(q.source, Some(SourceType::Bluray));
        assert_eq!(q.codec, Some(VideoCodec::H265));
        assert_eq!(q.hdr, Some(HdrFormat::Hdr10Plus));
    }

    #[test]
    fn test_parse_remux_beats_bluray() {
        let q = parse_quality("Movie.2019.1080p.BluRay.REMUX.AVC.DTS-HD.MA-GRP");
        assert_eq!(q.source, Some(SourceType::Remux));
        assert_eq!(q.codec, Some(VideoCodec::H264));
    }

    #[test]
    fn test_parse_webrip_not_webdl() {
        let q = parse_quality("Show.S01E02.720p.WEBRip.x264-GRP");
        assert_eq!(q.resolution, Some(Resolution::R720));
        assert_eq!(q.source, Some(SourceType::WebRip));
    }

    #[test]
    fn test_parse_dolby_vision_and_4k_alias() {
        let q = parse_quality("Movie 4K DV WEB h265");
        assert_eq!(q.resolution, Some(Resolution::R2160));
        assert_eq!(q.hdr, Some(HdrFormat::DolbyVision));
        assert_eq!(q.source, Some(SourceType::WebDl));
        assert_eq!(q.codec, Some(VideoCodec::H265));
    }

    #[test]
    fn test_parse_proper_repack() {
        let q = parse_quality("Show.S02E05.PROPER.1080p.HDTV.x264");
        assert!(q.proper);
        assert!(!q.repack);
        assert_eq!(q.source, Some(SourceType::Hdtv));

        let q = parse_quality("Show_S02E05_REPACK_720p_HDTV");
        assert!(q.repack);
        assert_eq!(q.revision(), 1);
    }

    #[test]
    fn test_parse_dvd_defaults_to_sd() {
        let q = parse_quality("Old.Movie.1995.DVDRip.XviD-GRP");
        assert_eq!(q.source, Some(SourceType::Dvd));
        assert_eq!(q.resolution, Some(Resolution::R480));
        assert_eq!(q.codec, Some(VideoCodec::Xvid));
    }

    #[test]
    fn test_parse_cam() {
        let q = parse_quality("New Movie 2024 HDCAM");
        assert_eq!(q.source, Some(SourceType::Cam));
        assert!(!q.is_recognized());
    }

    #[test]
    fn test_parse_unrecognized() {
        let q = parse_quality("completely random words");
        assert_eq!(q, ParsedQuality::default());
        assert!(!q.is_recognized());
    }
}
