//! Quality-driven media acquisition pipeline.
//!
//! Searches release sources for monitored titles, picks the best candidate
//! per quality slot, hands it to a download client, imports the finished
//! file into the library and keeps external requests up to date.

pub mod acquisition;
pub mod config;
pub mod download_client;
pub mod events;
pub mod grab;
pub mod history;
pub mod import;
pub mod library;
pub mod locks;
pub mod metadata;
pub mod metrics;
pub mod quality;
pub mod queue;
pub mod scheduler;
pub mod searcher;
pub mod shared;
pub mod slots;
pub mod status;
pub mod testing;

pub use acquisition::{AcquisitionService, SearchReport, SearchTrigger, SweepReport};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use download_client::{ClientRegistry, DownloadClient, QBittorrentClient, QueueItem, QueueStatus};
pub use events::{BroadcastEventSink, EventSink, PipelineEvent};
pub use grab::{GrabOrchestrator, GrabRecord, GrabStore, SqliteGrabStore};
pub use history::{
    create_history_system, HistoryEvent, HistoryFilter, HistoryHandle, HistoryStore,
    SqliteHistoryStore,
};
pub use import::{ImportPipeline, MediaProbe, NullProbe, Organizer, TemplateOrganizer};
pub use library::{LibraryStore, MediaTarget, SqliteLibraryStore};
pub use metadata::MetadataProvider;
pub use queue::{QueueSnapshot, QueueTracker};
pub use scheduler::{Scheduler, TaskSchedule};
pub use searcher::{JackettSource, RoutingMode, SearchRouter, SourceSearch};
pub use shared::Shared;
pub use status::{Request, RequestStatus, RequestStore, SqliteRequestStore, StatusTracker};
