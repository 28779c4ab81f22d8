//! Quality slots and the slot matcher.

mod matcher;
mod types;

pub use matcher::{
    ScoredCandidate, SlotAssignment, SlotDecision, SlotMatcher, SlotOutcome, SlotState,
};
pub use types::{effective_slots, Slot, SlotOverride, SlotSnapshot};
