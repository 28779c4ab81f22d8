//! Release search across configured sources.
//!
//! Sources implement [`SourceSearch`]; the [`SearchRouter`] fans a query out
//! to the sources serving the requested routing mode, enforcing per-source
//! rate budgets and timeouts, and merges the results into candidates.

mod dedup;
mod jackett;
mod rate_limiter;
mod router;
mod types;

pub use dedup::{canonical_key, deduplicate_releases, normalize_title};
pub use jackett::JackettSource;
pub use rate_limiter::{RateBudget, RateDecision, RateLimitStatus, RateLimiter};
pub use router::SearchRouter;
pub use types::*;
