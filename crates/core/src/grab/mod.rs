//! Submitting chosen releases to download clients.

mod orchestrator;
mod sqlite;
mod store;
mod types;

pub use orchestrator::GrabOrchestrator;
pub use sqlite::SqliteGrabStore;
pub use store::GrabStore;
pub use types::*;
