//! Merging of search results that describe the same physical release.

use crate::quality::{parse_quality, ParsedQuality};

use super::{CandidateRelease, RawRelease};

/// Relative size difference (in percent) under which two listings count as
/// the same file.
const SIZE_TOLERANCE_PERCENT: u64 = 1;

/// Deduplicate raw results from every source into candidates.
///
/// Two listings merge when they share an info hash, or when their canonical
/// keys (normalized title tokens plus parsed resolution, source and codec)
/// are equal and their sizes agree within 1%. The merged candidate keeps
/// the first listing's title and source, records the others in
/// `also_seen_on`, and fills in links and hash from whichever listing had
/// them. Order follows first appearance.
pub fn deduplicate_releases(raw: Vec<RawRelease>) -> Vec<CandidateRelease> {
    let mut merged: Vec<(String, CandidateRelease)> = Vec::new();

    for r in raw {
        let quality = parse_quality(&r.title);
        let key = canonical_key(&r.title, &quality);
        let hash = r
            .info_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|h| h.to_lowercase());

        let existing = merged.iter_mut().find(|(existing_key, c)| {
            let same_hash = matches!((&hash, &c.info_hash), (Some(a), Some(b)) if a == b);
            same_hash || (*existing_key == key && sizes_match(c.size_bytes, r.size_bytes))
        });

        match existing {
            Some((_, candidate)) => {
                if candidate.source != r.source && !candidate.also_seen_on.contains(&r.source) {
                    candidate.also_seen_on.push(r.source);
                }
                candidate.seeders = candidate.seeders.max(r.seeders);
                if candidate.magnet_uri.is_none() {
                    candidate.magnet_uri = r.magnet_uri;
                }
                if candidate.download_url.is_none() {
                    candidate.download_url = r.download_url;
                }
                if candidate.info_hash.is_none() {
                    candidate.info_hash = hash;
                }
                // Keep earliest publish date
                if let Some(date) = r.publish_date {
                    candidate.publish_date = Some(match candidate.publish_date {
                        Some(existing_date) => existing_date.min(date),
                        None => date,
                    });
                }
            }
            None => merged.push((
                key,
                CandidateRelease {
                    title: r.title,
                    size_bytes: r.size_bytes,
                    source: r.source,
                    also_seen_on: Vec::new(),
                    magnet_uri: r.magnet_uri,
                    download_url: r.download_url,
                    info_hash: hash,
                    seeders: r.seeders,
                    publish_date: r.publish_date,
                    quality,
                },
            )),
        }
    }

    merged.into_iter().map(|(_, c)| c).collect()
}

/// Normalized title tokens joined with the quality attributes.
pub fn canonical_key(title: &str, quality: &ParsedQuality) -> String {
    format!(
        "{}|{:?}|{:?}|{:?}",
        normalize_title(title),
        quality.resolution,
        quality.source,
        quality.codec
    )
}

/// Lowercase alphanumeric tokens, with bracketed site tags removed.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth = 0u32;
    for c in title.chars() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => out.push(' '),
        }
        if matches!(c, '[' | ']' | '{' | '}') {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sizes_match(a: u64, b: u64) -> bool {
    let larger = a.max(b);
    let diff = a.abs_diff(b);
    diff.saturating_mul(100) <= larger.saturating_mul(SIZE_TOLERANCE_PERCENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw(title: &str, source: &str, size: u64, hash: Option<&str>) -> RawRelease {
        RawRelease {
            title: title.to_string(),
            source: source.to_string(),
            size_bytes: size,
            magnet_uri: hash.map(|h| format!("magnet:?xt=urn:btih:{}", h)),
            download_url: None,
            info_hash: hash.map(|h| h.to_string()),
            seeders: 10,
            publish_date: None,
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("[SiteTag] Some.Movie.2021.1080p.WEB-DL.x264-GRP"),
            "some movie 2021 1080p web dl x264 grp"
        );
        assert_eq!(
            normalize_title("Some Movie (2021) {x} 1080p"),
            "some movie 2021 1080p"
        );
    }

    #[test]
    fn test_title_variants_merge_across_sources() {
        let results = deduplicate_releases(vec![
            raw("Some.Movie.2021.1080p.WEB-DL.x264-GRP", "alpha", 4_000_000_000, None),
            raw("Some Movie 2021 1080p WEB-DL x264-GRP", "beta", 4_010_000_000, None),
        ]);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "alpha");
        assert_eq!(results[0].also_seen_on, vec!["beta"]);
    }

    #[test]
    fn test_size_outside_tolerance_stays_separate() {
        let results = deduplicate_releases(vec![
            raw("Some.Movie.2021.1080p.WEB-DL.x264-GRP", "alpha", 4_000_000_000, None),
            raw("Some.Movie.2021.1080p.WEB-DL.x264-GRP", "beta", 4_200_000_000, None),
        ]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_different_quality_stays_separate() {
        let results = deduplicate_releases(vec![
            raw("Some.Movie.2021.1080p.WEB-DL.x264-GRP", "alpha", 4_000, None),
            raw("Some.Movie.2021.720p.WEB-DL.x264-GRP", "alpha", 4_000, None),
        ]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_same_hash_always_merges() {
        let results = deduplicate_releases(vec![
            raw("Completely Different Name", "alpha", 1_000, Some("ABCDEF")),
            raw("Some.Movie.1080p", "beta", 9_000, Some("abcdef")),
        ]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].info_hash.as_deref(), Some("abcdef"));
    }

    #[test]
    fn test_merge_fills_missing_fields() {
        let mut first = raw("Movie.1080p.WEB-DL", "alpha", 1_000, None);
        first.seeders = 3;
        first.download_url = Some("http://alpha/1.torrent".into());
        first.publish_date = Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());

        let mut second = raw("Movie.1080p.WEB-DL", "beta", 1_000, Some("ff00"));
        second.seeders = 40;
        second.publish_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let results = deduplicate_releases(vec![first, second]);
        assert_eq!(results.len(), 1);
        let c = &results[0];
        assert_eq!(c.seeders, 40);
        assert_eq!(c.info_hash.as_deref(), Some("ff00"));
        assert_eq!(c.magnet_uri.as_deref(), Some("magnet:?xt=urn:btih:ff00"));
        assert_eq!(c.download_url.as_deref(), Some("http://alpha/1.torrent"));
        assert_eq!(
            c.publish_date,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_duplicate_from_same_source_not_listed_twice() {
        let results = deduplicate_releases(vec![
            raw("Movie.1080p.WEB-DL", "alpha", 1_000, None),
            raw("Movie.1080p.WEB-DL", "alpha", 1_000, None),
        ]);
        assert_eq!(results.len(), 1);
        assert!(results[0].also_seen_on.is_empty());
    }

    #[test]
    fn test_sizes_match() {
        assert!(sizes_match(0, 0));
        assert!(sizes_match(1_000, 1_010));
        assert!(!sizes_match(1_000, 1_011));
        assert!(!sizes_match(0, 10));
    }
}
