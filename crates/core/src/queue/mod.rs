//! Download queue mirroring.

mod tracker;
mod types;

pub use tracker::QueueTracker;
pub use types::*;
