//! Per-slot candidate selection.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::library::MediaTarget;
use crate::quality::{ParsedQuality, QualityProfile, QualityRank, QualityScore, QualityScorer};
use crate::searcher::CandidateRelease;

use super::Slot;

/// What the library and grab history say about one slot right now.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    /// Quality of the file currently held for the slot.
    pub existing: Option<ParsedQuality>,
    /// An unresolved grab is already in flight for the slot.
    pub pending_grab: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: CandidateRelease,
    pub score: QualityScore,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SlotOutcome {
    /// A candidate was selected for grabbing.
    Chosen(ScoredCandidate),
    /// The existing file already meets the profile cutoff.
    AtCutoff { rank: QualityRank },
    /// A file exists and the profile does not allow upgrades.
    UpgradesDisabled { rank: QualityRank },
    /// A grab for this slot is still being downloaded or imported.
    PendingGrab,
    /// Nothing qualified; retried on the next search.
    NoCandidate,
    Disabled,
    /// The slot references a profile that does not exist.
    MissingProfile { profile_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotDecision {
    pub slot: Slot,
    #[serde(flatten)]
    pub outcome: SlotOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotAssignment {
    pub target_id: String,
    pub decisions: Vec<SlotDecision>,
}

impl SlotAssignment {
    /// Slots that selected a candidate.
    pub fn chosen(&self) -> impl Iterator<Item = (&Slot, &ScoredCandidate)> {
        self.decisions.iter().filter_map(|d| match &d.outcome {
            SlotOutcome::Chosen(c) => Some((&d.slot, c)),
            _ => None,
        })
    }

    /// Slots that still want a file but found no candidate.
    pub fn unmet(&self) -> impl Iterator<Item = &Slot> {
        self.decisions.iter().filter_map(|d| match d.outcome {
            SlotOutcome::NoCandidate => Some(&d.slot),
            _ => None,
        })
    }

    pub fn outcome(&self, slot_id: &str) -> Option<&SlotOutcome> {
        self.decisions
            .iter()
            .find(|d| d.slot.id == slot_id)
            .map(|d| &d.outcome)
    }
}

pub struct SlotMatcher;

impl SlotMatcher {
    /// Pick at most one candidate per enabled, unmet slot.
    ///
    /// Slots are visited in order; a release chosen by an earlier slot is
    /// not offered to later ones so one search never grabs the same release
    /// twice.
    pub fn assign_slots(
        target: &MediaTarget,
        slots: &[Slot],
        profiles: &[QualityProfile],
        states: &HashMap<String, SlotState>,
        candidates: &[CandidateRelease],
    ) -> SlotAssignment {
        let default_state = SlotState::default();
        let mut taken: HashSet<(String, String)> = HashSet::new();
        let mut decisions = Vec::with_capacity(slots.len());

        for slot in slots {
            let state = states.get(&slot.id).unwrap_or(&default_state);
            let outcome = Self::match_slot(slot, profiles, state, candidates, &taken);

            if let SlotOutcome::Chosen(chosen) = &outcome {
                taken.insert(identity(&chosen.candidate));
            }

            debug!(
                target_id = %target.id,
                slot_id = %slot.id,
                outcome = outcome_label(&outcome),
                "Slot evaluated"
            );
            decisions.push(SlotDecision {
                slot: slot.clone(),
                outcome,
            });
        }

        SlotAssignment {
            target_id: target.id.clone(),
            decisions,
        }
    }

    fn match_slot(
        slot: &Slot,
        profiles: &[QualityProfile],
        state: &SlotState,
        candidates: &[CandidateRelease],
        taken: &HashSet<(String, String)>,
    ) -> SlotOutcome {
        if !slot.enabled {
            return SlotOutcome::Disabled;
        }

        let Some(profile) = profiles.iter().find(|p| p.id == slot.profile_id) else {
            warn!(
                slot_id = %slot.id,
                profile_id = %slot.profile_id,
                "Slot references unknown quality profile"
            );
            return SlotOutcome::MissingProfile {
                profile_id: slot.profile_id.clone(),
            };
        };

        if state.pending_grab {
            return SlotOutcome::PendingGrab;
        }

        let existing_rank = match &state.existing {
            Some(existing) => {
                let score = QualityScorer::score(existing, profile);
                if score.meets_cutoff {
                    return SlotOutcome::AtCutoff { rank: score.rank };
                }
                if !profile.upgrades_allowed {
                    return SlotOutcome::UpgradesDisabled { rank: score.rank };
                }
                Some(score.rank)
            }
            None => None,
        };

        let best = candidates
            .iter()
            .filter(|c| !taken.contains(&identity(c)))
            .map(|c| (c, QualityScorer::score(&c.quality, profile)))
            .filter(|(_, score)| !score.rank.is_unranked())
            .filter(|(_, score)| match existing_rank {
                Some(rank) => score.is_upgrade_over(rank),
                None => true,
            })
            .max_by(|(a, _), (b, _)| QualityScorer::compare(a, b, profile));

        match best {
            Some((candidate, score)) => SlotOutcome::Chosen(ScoredCandidate {
                candidate: candidate.clone(),
                score,
            }),
            None => SlotOutcome::NoCandidate,
        }
    }
}

fn identity(candidate: &CandidateRelease) -> (String, String) {
    (candidate.title.clone(), candidate.source.clone())
}

fn outcome_label(outcome: &SlotOutcome) -> &'static str {
    match outcome {
        SlotOutcome::Chosen(_) => "chosen",
        SlotOutcome::AtCutoff { .. } => "at_cutoff",
        SlotOutcome::UpgradesDisabled { .. } => "upgrades_disabled",
        SlotOutcome::PendingGrab => "pending_grab",
        SlotOutcome::NoCandidate => "no_candidate",
        SlotOutcome::Disabled => "disabled",
        SlotOutcome::MissingProfile { .. } => "missing_profile",
    }
}
