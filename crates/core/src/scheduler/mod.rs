//! Periodic maintenance tasks.
//!
//! Tasks are registered by name with a [`TaskSchedule`] and an async body
//! returning a one-line summary. Each task is single-flight.

mod runner;
mod types;

pub use runner::Scheduler;
pub use types::*;
