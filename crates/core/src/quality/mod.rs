//! Release quality: title parsing, quality profiles and scoring.
//!
//! A [`QualityProfile`] lists acceptable tiers best first. The
//! [`QualityScorer`] maps parsed release attributes onto that list and
//! provides the deterministic ordering used to pick a best candidate.

mod parser;
mod scorer;
mod types;

pub use parser::parse_quality;
pub use scorer::{QualityScore, QualityScorer};
pub use types::*;
