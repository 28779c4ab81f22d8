//! Import pipeline: completed downloads into the library.
//!
//! Each completed queue item that belongs to one of our grabs goes through
//! `evaluating` and ends `imported` or `rejected`:
//!
//! - no file in the slot: [`ImportDecision::New`]
//! - the download outranks the slot's file: [`ImportDecision::Upgrade`]
//! - otherwise: [`ImportDecision::RejectLowerQuality`]
//! - the grab was already decided: [`ImportDecision::RejectDuplicate`]
//!
//! Filesystem and probe failures leave the grab unresolved for the next scan.

mod organizer;
mod pipeline;
mod probe;
mod transfer;
mod types;

pub use organizer::{IncomingFile, Organizer, TemplateOrganizer};
pub use pipeline::ImportPipeline;
pub use probe::{MediaAttributes, MediaProbe, NullProbe};
pub use transfer::{calculate_checksum, transfer_file, TransferError, TransferMethod, TransferOptions, TransferResult};
pub use types::*;
