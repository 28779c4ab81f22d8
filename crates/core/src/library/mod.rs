//! Library state: media targets and the files held for their slots.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteLibraryStore;
pub use store::LibraryStore;
pub use types::*;
