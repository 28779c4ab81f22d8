//! External request fulfillment.
//!
//! Requests are owned elsewhere; the [`StatusTracker`] only advances their
//! status from library state, recomputing from scratch on every change.

mod sqlite;
mod store;
mod tracker;
mod types;

pub use sqlite::SqliteRequestStore;
pub use store::RequestStore;
pub use tracker::StatusTracker;
pub use types::*;
