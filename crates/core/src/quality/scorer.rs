//! Ranking releases against quality profiles.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::searcher::CandidateRelease;

use super::types::{ParsedQuality, QualityProfile, QualityRank};

/// Verdict for one release under one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub rank: QualityRank,
    /// Name of the matched tier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    pub meets_cutoff: bool,
    pub upgrades_allowed: bool,
}

impl QualityScore {
    /// True only if the profile permits upgrades and this rank is strictly
    /// higher than the rank of the file currently held.
    pub fn is_upgrade_over(&self, existing: QualityRank) -> bool {
        self.upgrades_allowed && self.rank > existing
    }
}

/// Stateless scoring functions.
pub struct QualityScorer;

impl QualityScorer {
    pub fn score(quality: &ParsedQuality, profile: &QualityProfile) -> QualityScore {
        let rank = profile.rank_of(quality);
        let meets_cutoff = match profile.cutoff_rank() {
            Some(cutoff) => !rank.is_unranked() && rank >= cutoff,
            None => false,
        };

        QualityScore {
            rank,
            tier: profile.tier(rank).map(|t| t.name.clone()),
            meets_cutoff,
            upgrades_allowed: profile.upgrades_allowed,
        }
    }

    /// Total order over candidates; `Greater` means `a` is preferred.
    ///
    /// Keys, most significant first: tier rank, PROPER/REPACK, HDR presence
    /// (only when the profile prefers HDR), size (larger wins), then title and
    /// source name so that distinct candidates never compare equal.
    pub fn compare(a: &CandidateRelease, b: &CandidateRelease, profile: &QualityProfile) -> Ordering {
        let rank_a = profile.rank_of(&a.quality);
        let rank_b = profile.rank_of(&b.quality);

        rank_a
            .cmp(&rank_b)
            .then_with(|| a.quality.revision().cmp(&b.quality.revision()))
            .then_with(|| {
                if profile.prefer_hdr {
                    a.quality.hdr.is_some().cmp(&b.quality.hdr.is_some())
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.size_bytes.cmp(&b.size_bytes))
            .then_with(|| b.title.cmp(&a.title))
            .then_with(|| b.source.cmp(&a.source))
    }

    /// Most preferred candidate, regardless of whether it is ranked at all.
    pub fn best<'a, I>(candidates: I, profile: &QualityProfile) -> Option<&'a CandidateRelease>
    where
        I: IntoIterator<Item = &'a CandidateRelease>,
    {
        candidates
            .into_iter()
            .max_by(|a, b| Self::compare(a, b, profile))
    }

    /// Candidates sorted best first.
    pub fn rank_candidates<'a>(
        candidates: &'a [CandidateRelease],
        profile: &QualityProfile,
    ) -> Vec<&'a CandidateRelease> {
        let mut sorted: Vec<&CandidateRelease> = candidates.iter().collect();
        sorted.sort_by(|a, b| Self::compare(b, a, profile));
        sorted
    }
}
