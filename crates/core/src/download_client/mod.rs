//! Download client abstraction.
//!
//! This module provides a `DownloadClient` trait for submitting releases and
//! mirroring job queues, with a qBittorrent Web API implementation.

mod qbittorrent;
mod registry;
mod types;

pub use qbittorrent::QBittorrentClient;
pub use registry::ClientRegistry;
pub use types::*;
