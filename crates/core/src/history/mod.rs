//! Append-only acquisition history.
//!
//! Components append [`HistoryEvent`]s through a cloneable [`HistoryHandle`];
//! a [`HistoryWriter`] task drains them into a [`HistoryStore`].

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
