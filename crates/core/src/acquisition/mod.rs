//! Search-and-grab cycle for media targets.
//!
//! Shared by manual searches and the scheduled autosearch sweep.

mod service;
mod types;

pub use service::AcquisitionService;
pub use types::*;
