//! Builds every component from the configuration and owns them for the
//! lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harvester_core::config::{DownloadClientBackend, SourceBackend};
use harvester_core::{
    create_history_system, validate_config, AcquisitionService, BroadcastEventSink,
    ClientRegistry, Config, DownloadClient, GrabOrchestrator, GrabStore, HistoryEvent,
    HistoryHandle, HistoryStore, ImportPipeline, JackettSource, LibraryStore, PipelineEvent,
    QBittorrentClient, QueueTracker, RequestStore, Scheduler, SearchRouter, Shared,
    SourceSearch, SqliteGrabStore, SqliteHistoryStore, SqliteLibraryStore, SqliteRequestStore,
    StatusTracker,
};

use crate::metrics;

/// Buffer size for the history event channel.
const HISTORY_BUFFER_SIZE: usize = 1000;

/// Capacity of the pipeline event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct App {
    config: Shared<Config>,
    history: HistoryHandle,
    history_writer: JoinHandle<()>,
    events: Arc<BroadcastEventSink>,
    router: Arc<SearchRouter>,
    tracker: Arc<QueueTracker>,
    pipeline: Arc<ImportPipeline>,
    status: Arc<StatusTracker>,
    acquisition: Arc<AcquisitionService>,
    scheduler: Scheduler,
    workers: Vec<JoinHandle<()>>,
}

impl App {
    /// Open the stores, build sources and clients, and register the
    /// scheduled tasks. Nothing runs until [`App::start`].
    pub fn build(config: Config) -> Result<Self> {
        let db_path = config.database.path.clone();
        info!("Database path: {:?}", db_path);

        let library: Arc<dyn LibraryStore> = Arc::new(
            SqliteLibraryStore::new(&db_path).context("Failed to create library store")?,
        );
        let grabs: Arc<dyn GrabStore> =
            Arc::new(SqliteGrabStore::new(&db_path).context("Failed to create grab store")?);
        let requests: Arc<dyn RequestStore> = Arc::new(
            SqliteRequestStore::new(&db_path).context("Failed to create request store")?,
        );
        let history_store: Arc<dyn HistoryStore> = Arc::new(
            SqliteHistoryStore::new(&db_path).context("Failed to create history store")?,
        );
        info!("Stores initialized");

        let sources = build_sources(&config)?;
        let clients = build_clients(&config)?;
        if sources.is_empty() {
            warn!("No release sources enabled, searches will find nothing");
        }
        if clients.is_empty() {
            warn!("No download clients enabled, grabs will fail");
        }

        let (history, history_writer) = create_history_system(history_store, HISTORY_BUFFER_SIZE);
        let history_writer = tokio::spawn(history_writer.run());

        let grace = Duration::from_millis(config.scheduler.shutdown_grace_ms);
        let config = Shared::new(config);
        let library = Shared::from_arc(library);
        let events = Arc::new(BroadcastEventSink::new(EVENT_CHANNEL_CAPACITY));

        let router = Arc::new(SearchRouter::new(sources, config.clone()));
        let orchestrator = Arc::new(GrabOrchestrator::new(
            Arc::clone(&grabs),
            clients.clone(),
            config.clone(),
            history.clone(),
            events.clone(),
        ));
        let status = Arc::new(StatusTracker::new(
            requests,
            library.clone(),
            history.clone(),
            events.clone(),
        ));
        let pipeline = Arc::new(ImportPipeline::new(
            grabs,
            library.clone(),
            config.clone(),
            Arc::clone(&status),
            history.clone(),
            events.clone(),
        ));
        let tracker = Arc::new(QueueTracker::new(clients, config.clone()));
        let acquisition = Arc::new(AcquisitionService::new(
            Arc::clone(&router),
            orchestrator,
            library,
            config.clone(),
            Arc::clone(&status),
            history.clone(),
        ));

        let app = Self {
            config,
            history,
            history_writer,
            events,
            router,
            tracker,
            pipeline,
            status,
            acquisition,
            scheduler: Scheduler::new(grace),
            workers: Vec::new(),
        };
        app.register_tasks()?;
        Ok(app)
    }

    fn register_tasks(&self) -> Result<()> {
        let config = self.config.current();

        for (name, schedule) in config.scheduler.tasks() {
            let schedule = schedule.clone();
            let registered = match name {
                "autosearch" => {
                    let acquisition = Arc::clone(&self.acquisition);
                    self.scheduler.register(name, schedule, move || {
                        let acquisition = Arc::clone(&acquisition);
                        async move { Ok::<_, anyhow::Error>(acquisition.sweep().await?.summary()) }
                    })
                }
                "availability_refresh" => {
                    let status = Arc::clone(&self.status);
                    self.scheduler.register(name, schedule, move || {
                        let status = Arc::clone(&status);
                        async move { Ok::<_, anyhow::Error>(status.refresh_all().await?.summary()) }
                    })
                }
                "import_scan" => {
                    let tracker = Arc::clone(&self.tracker);
                    let pipeline = Arc::clone(&self.pipeline);
                    self.scheduler.register(name, schedule, move || {
                        let tracker = Arc::clone(&tracker);
                        let pipeline = Arc::clone(&pipeline);
                        async move {
                            let snapshot = tracker.poll_once().await;
                            Ok(pipeline.scan(&snapshot).await.summary())
                        }
                    })
                }
                "health_check" => {
                    let router = Arc::clone(&self.router);
                    let tracker = Arc::clone(&self.tracker);
                    let config = self.config.clone();
                    self.scheduler.register(name, schedule, move || {
                        let router = Arc::clone(&router);
                        let tracker = Arc::clone(&tracker);
                        let config = config.current();
                        async move { health_check(&router, &tracker, &config) }
                    })
                }
                other => bail!("No runner for scheduled task {}", other),
            };
            registered.with_context(|| format!("Failed to register task {}", name))?;
        }
        Ok(())
    }

    /// Record the start in history and launch the background loops.
    pub fn start(&mut self, version: &str, config_hash: &str) {
        self.history.append(HistoryEvent::ServiceStarted {
            version: version.to_string(),
            config_hash: config_hash.to_string(),
        });
        metrics::START_TIME.set(chrono::Utc::now().timestamp());

        self.workers.push(spawn_event_logger(self.events.subscribe()));
        if let Some(handle) = self.tracker.start() {
            self.workers.push(handle);
        }
        if let Some(handle) = self.pipeline.start(&self.tracker) {
            self.workers.push(handle);
        }
        self.scheduler.start();
        info!(tasks = ?self.scheduler.task_names(), "Service started");
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &SearchRouter {
        &self.router
    }

    /// Apply a changed configuration without restarting.
    ///
    /// Components read the new values on their next cycle. Release sources
    /// are rebuilt so newly enabled ones join the router; download clients
    /// and the database path only change on restart.
    pub fn reload(&self, config: Config) -> Result<()> {
        validate_config(&config).context("Configuration validation failed")?;
        let sources = build_sources(&config)?;

        let previous = self.config.current();
        if previous.database.path != config.database.path {
            warn!("Database path changed, restart to apply");
        }

        for (name, schedule) in config.scheduler.tasks() {
            self.scheduler
                .update_schedule(name, schedule.clone())
                .with_context(|| format!("Failed to update schedule of {}", name))?;
        }
        self.router.replace_sources(sources);
        self.config.replace(Arc::new(config));
        info!("Configuration reloaded");
        Ok(())
    }

    /// Stop every loop, record the stop and flush history.
    pub async fn shutdown(self, reason: &str) {
        info!("Stopping scheduler...");
        self.scheduler.stop().await;
        self.pipeline.stop();
        self.tracker.stop();

        let Self {
            history,
            history_writer,
            events,
            router,
            tracker,
            pipeline,
            status,
            acquisition,
            scheduler,
            workers,
            config: _,
        } = self;

        // The event logger only ends once every sink clone is gone.
        drop((scheduler, acquisition, pipeline, status, tracker, router, events));
        for worker in workers {
            if let Err(e) = worker.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }

        history.append(HistoryEvent::ServiceStopped {
            reason: reason.to_string(),
        });
        drop(history);

        if let Err(e) = history_writer.await {
            warn!(error = %e, "History writer ended abnormally");
        }
        info!("History writer stopped");
    }
}

fn build_sources(config: &Config) -> Result<Vec<Arc<dyn SourceSearch>>> {
    let mut sources: Vec<Arc<dyn SourceSearch>> = Vec::new();

    for source in config.searcher.sources.iter().filter(|s| s.enabled) {
        match source.backend {
            SourceBackend::Jackett => {
                let Some(jackett) = &source.jackett else {
                    bail!("Source {} uses jackett but has no jackett section", source.name);
                };
                info!(source = %source.name, kind = ?source.kind, "Initializing Jackett source");
                let built = JackettSource::new(
                    source.name.clone(),
                    source.kind,
                    jackett.clone(),
                    config.searcher.timeout_for(&source.name),
                )
                .with_context(|| format!("Failed to create source {}", source.name))?;
                sources.push(Arc::new(built));
            }
        }
    }
    Ok(sources)
}

fn build_clients(config: &Config) -> Result<ClientRegistry> {
    let mut clients: Vec<Arc<dyn DownloadClient>> = Vec::new();

    for client in config.download_clients.iter().filter(|c| c.enabled) {
        match client.backend {
            DownloadClientBackend::Qbittorrent => {
                let Some(qbit) = &client.qbittorrent else {
                    bail!("Client {} uses qbittorrent but has no qbittorrent section", client.name);
                };
                info!(client = %client.name, url = %qbit.url, "Initializing qBittorrent client");
                let built = QBittorrentClient::new(client.name.clone(), qbit.clone())
                    .with_context(|| format!("Failed to create client {}", client.name))?;
                clients.push(Arc::new(built));
            }
        }
    }
    Ok(ClientRegistry::new(clients))
}

/// Report unreachable download clients and refresh the exported metrics.
fn health_check(router: &SearchRouter, tracker: &QueueTracker, config: &Config) -> Result<String> {
    let snapshot = tracker.latest();
    let clients: Vec<String> = config
        .download_clients
        .iter()
        .filter(|c| c.enabled)
        .map(|c| c.name.clone())
        .collect();

    metrics::collect_health(router, &clients, snapshot.as_deref());
    if let Some(path) = &config.metrics.textfile_path {
        metrics::write_textfile(path)?;
    }

    let Some(snapshot) = snapshot else {
        return Ok(format!("{} clients, queue not polled yet", clients.len()));
    };
    if snapshot.unreachable.is_empty() {
        return Ok(format!("{} clients reachable", clients.len()));
    }

    let down: Vec<&str> = snapshot.unreachable.iter().map(|u| u.client.as_str()).collect();
    for unreachable in &snapshot.unreachable {
        warn!(
            client = %unreachable.client,
            error = %unreachable.error,
            "Download client unreachable"
        );
    }
    bail!("unreachable download clients: {}", down.join(", "))
}

/// Hand pipeline events to the log until every sender is dropped.
fn spawn_event_logger(mut rx: broadcast::Receiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "harvester::events", event = %json, "Pipeline event"),
                    Err(e) => warn!(error = %e, "Failed to serialize pipeline event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
