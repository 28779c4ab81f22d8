//! Import of completed downloads into the library.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, ImportConfig, ReplacedFilePolicy};
use crate::download_client::{QueueItem, QueueStatus};
use crate::events::{EventSink, PipelineEvent};
use crate::grab::{GrabRecord, GrabResolution, GrabStore};
use crate::history::{HistoryEvent, HistoryHandle};
use crate::library::{LibraryFile, LibraryStore};
use crate::locks::KeyedLocks;
use crate::metrics;
use crate::quality::{ParsedQuality, QualityProfile, QualityScorer};
use crate::queue::{QueueSnapshot, QueueTracker};
use crate::shared::Shared;
use crate::status::{LibraryChange, StatusTracker};

use super::organizer::{IncomingFile, Organizer, TemplateOrganizer};
use super::probe::{MediaProbe, NullProbe};
use super::transfer::{transfer_file, TransferOptions};
use super::{ImportDecision, ImportError, ImportOutcome, ItemOutcome, ScanReport};

type JobKey = (String, String);

/// Evaluates completed downloads and moves accepted files into the library.
///
/// Evaluation of one media target is serialized; different targets import
/// concurrently. A grab is resolved at most once, so re-scanning the same
/// download queue never mutates the library twice.
pub struct ImportPipeline {
    grabs: Arc<dyn GrabStore>,
    library: Shared<dyn LibraryStore>,
    config: Shared<Config>,
    organizer: Arc<dyn Organizer>,
    probe: Arc<dyn MediaProbe>,
    status: Arc<StatusTracker>,
    history: HistoryHandle,
    events: Arc<dyn EventSink>,
    scan_lock: tokio::sync::Mutex<()>,
    target_locks: KeyedLocks<String>,
    /// Jobs already decided during this process lifetime.
    settled: Mutex<HashSet<JobKey>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ImportPipeline {
    pub fn new(
        grabs: Arc<dyn GrabStore>,
        library: Shared<dyn LibraryStore>,
        config: Shared<Config>,
        status: Arc<StatusTracker>,
        history: HistoryHandle,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            grabs,
            library,
            config,
            organizer: Arc::new(TemplateOrganizer::new()),
            probe: Arc::new(NullProbe),
            status,
            history,
            events,
            scan_lock: tokio::sync::Mutex::new(()),
            target_locks: KeyedLocks::new(),
            settled: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn with_organizer(mut self, organizer: Arc<dyn Organizer>) -> Self {
        self.organizer = organizer;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Evaluate every completed or failed item in a queue snapshot.
    ///
    /// Only one scan runs at a time; a scan requested while another is in
    /// progress returns immediately with `skipped` set.
    pub async fn scan(&self, snapshot: &QueueSnapshot) -> ScanReport {
        let Ok(_scan) = self.scan_lock.try_lock() else {
            debug!("Import scan already running, skipping");
            return ScanReport {
                skipped: true,
                ..Default::default()
            };
        };

        self.forget_departed(snapshot);

        let mut report = ScanReport {
            items_seen: snapshot.items.len(),
            ..Default::default()
        };

        for item in &snapshot.items {
            if !is_terminal(item) || self.is_settled(item) {
                continue;
            }
            match self.process_item(item).await {
                Ok(ItemOutcome::Ignored) => {}
                Ok(ItemOutcome::Decided(outcome)) => {
                    self.settle(item);
                    report.decisions.push(outcome);
                }
                Ok(ItemOutcome::DownloadFailed { .. }) => {
                    self.settle(item);
                    report.download_failures += 1;
                }
                Err(_) => report.failures += 1,
            }
        }

        if !report.decisions.is_empty() || report.failures > 0 || report.download_failures > 0 {
            info!(
                imported = report.count(ImportDecision::New),
                upgraded = report.count(ImportDecision::Upgrade),
                rejected = report.count(ImportDecision::RejectLowerQuality)
                    + report.count(ImportDecision::RejectDuplicate),
                download_failures = report.download_failures,
                failures = report.failures,
                "Import scan complete"
            );
        }
        report
    }

    /// Evaluate one queue item.
    ///
    /// Failures are recorded in history and leave the grab unresolved so the
    /// next scan retries it.
    pub async fn process_item(&self, item: &QueueItem) -> Result<ItemOutcome, ImportError> {
        match item.status {
            QueueStatus::Completed => {}
            QueueStatus::Error => return self.handle_download_failure(item).await,
            _ => return Ok(ItemOutcome::Ignored),
        }

        let Some(grab) = self.grabs.find_by_job(&item.client, &item.job_id)? else {
            debug!(
                client = %item.client,
                job_id = %item.job_id,
                "Completed job has no grab record, ignoring"
            );
            return Ok(ItemOutcome::Ignored);
        };

        let _guard = self.target_locks.lock(grab.target_id.clone()).await;

        match self.evaluate(&grab, item).await {
            Ok(outcome) => Ok(ItemOutcome::Decided(outcome)),
            Err(e) => {
                self.record_failure(&grab, &e);
                Err(e)
            }
        }
    }

    /// Start listening to queue snapshots and import as soon as a download
    /// completes, without waiting for the scheduled scan.
    pub fn start(self: &Arc<Self>, tracker: &QueueTracker) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Import fast path already running");
            return None;
        }

        let pipeline = Arc::clone(self);
        let mut snapshots = tracker.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            info!("Import fast path started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = snapshots.recv() => match received {
                        Ok(snapshot) => {
                            let has_work = snapshot
                                .items
                                .iter()
                                .any(|i| is_terminal(i) && !pipeline.is_settled(i));
                            if has_work {
                                pipeline.scan(&snapshot).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Import fast path lagged behind queue snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("Import fast path stopped");
        }))
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }

    async fn evaluate(&self, grab: &GrabRecord, item: &QueueItem) -> Result<ImportOutcome, ImportError> {
        // Settled jobs are only remembered in memory, so after a restart a
        // finished job still in the client's queue comes through again.
        // Its decision is already in history.
        if let Some(resolution) = self.grabs.resolution(&grab.id)? {
            let reason = format!("grab was already {}", resolution.resolution.as_str());
            debug!(grab_id = %grab.id, reason = %reason, "Grab already resolved, skipping");
            return Ok(unchanged(
                grab,
                ImportDecision::RejectDuplicate,
                reason,
                grab.release.quality.clone(),
            ));
        }

        let library = self.library.current();
        let target = library
            .get_target(&grab.target_id)?
            .ok_or_else(|| ImportError::TargetNotFound(grab.target_id.clone()))?;

        let config = self.config.current();
        let profile = config
            .profile(&grab.slot.profile_id)
            .ok_or_else(|| ImportError::MissingProfile(grab.slot.profile_id.clone()))?;

        let source = locate_video(item, &config.import).await?;

        let quality = match self.probe.probe(&source).await {
            Ok(Some(attributes)) => attributes.apply_to(&grab.release.quality),
            Ok(None) => grab.release.quality.clone(),
            Err(e) => return Err(ImportError::Probe(e)),
        };

        let existing = library.file_for_slot(&target.id, &grab.slot.slot_id)?;
        let (decision, reason) = decide(&quality, existing.as_ref(), profile, &grab.id);

        debug!(
            grab_id = %grab.id,
            target_id = %target.id,
            slot_id = %grab.slot.slot_id,
            decision = decision.as_str(),
            reason = %reason,
            "Import evaluated"
        );

        if !decision.is_import() {
            let resolution = match decision {
                // The file is already ours; only the resolution was missing.
                ImportDecision::RejectDuplicate => GrabResolution::Imported,
                _ => GrabResolution::Rejected,
            };
            return Ok(self.reject(grab, decision, reason, quality, Some(resolution)));
        }

        let destination = self.organizer.destination_path(
            &config.import.library_root,
            &target,
            &IncomingFile {
                path: &source,
                slot_id: &grab.slot.slot_id,
                release_title: &grab.release.title,
                quality: &quality,
            },
        );
        let options = TransferOptions {
            mode: config.import.transfer_mode,
            verify_checksum: config.import.verify_checksum,
            buffer_size: config.import.buffer_size,
        };
        let transferred = transfer_file(&source, &destination, &options).await?;

        let file = LibraryFile {
            target_id: target.id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            path: transferred.destination.clone(),
            size_bytes: transferred.size_bytes,
            quality: quality.clone(),
            release_title: grab.release.title.clone(),
            grab_id: Some(grab.id.clone()),
            imported_at: Utc::now(),
        };
        let replaced = library.put_file(&file)?;

        let replaced_kept = match &replaced {
            Some(old) if old.path != file.path => {
                dispose_replaced(&old.path, config.import.replaced_file_policy).await
            }
            _ => false,
        };

        let resolution = match decision {
            ImportDecision::Upgrade => GrabResolution::Upgraded,
            _ => GrabResolution::Imported,
        };
        if let Err(e) = self.grabs.resolve(&grab.id, resolution, &reason) {
            // The library file carries the grab id, so a rescan still sees it.
            warn!(grab_id = %grab.id, error = %e, "Failed to record grab resolution");
        }

        let path = file.path.display().to_string();
        self.history.append(HistoryEvent::ImportDecided {
            target_id: target.id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            grab_id: grab.id.clone(),
            decision: decision.as_str().to_string(),
            reason: reason.clone(),
        });
        match &replaced {
            Some(old) => {
                self.history.append(HistoryEvent::FileUpgraded {
                    target_id: target.id.clone(),
                    slot_id: grab.slot.slot_id.clone(),
                    grab_id: grab.id.clone(),
                    path: path.clone(),
                    quality: quality.to_string(),
                    replaced_path: old.path.display().to_string(),
                    replaced_quality: old.quality.to_string(),
                    replaced_kept,
                });
                self.events.publish(PipelineEvent::Upgraded {
                    target_id: target.id.clone(),
                    slot_id: grab.slot.slot_id.clone(),
                    path: path.clone(),
                    replaced_path: old.path.display().to_string(),
                });
            }
            None => {
                self.history.append(HistoryEvent::FileImported {
                    target_id: target.id.clone(),
                    slot_id: grab.slot.slot_id.clone(),
                    grab_id: grab.id.clone(),
                    path: path.clone(),
                    quality: quality.to_string(),
                });
                self.events.publish(PipelineEvent::Imported {
                    target_id: target.id.clone(),
                    slot_id: grab.slot.slot_id.clone(),
                    path: path.clone(),
                });
            }
        }
        metrics::IMPORT_DECISIONS
            .with_label_values(&[decision.as_str()])
            .inc();

        info!(
            grab_id = %grab.id,
            target_id = %target.id,
            slot_id = %grab.slot.slot_id,
            decision = decision.as_str(),
            path = %path,
            "File imported"
        );

        if let Err(e) = self.status.on_library_change(&LibraryChange::FileAdded {
            target_id: target.id.clone(),
            catalog_id: target.catalog_id.clone(),
        }) {
            warn!(target_id = %target.id, error = %e, "Failed to update request status");
        }

        Ok(ImportOutcome {
            grab_id: grab.id.clone(),
            target_id: target.id,
            slot_id: grab.slot.slot_id.clone(),
            decision,
            reason,
            quality,
            path: Some(file.path),
            replaced,
        })
    }

    /// Record a decision that leaves the library untouched.
    fn reject(
        &self,
        grab: &GrabRecord,
        decision: ImportDecision,
        reason: String,
        quality: ParsedQuality,
        resolution: Option<GrabResolution>,
    ) -> ImportOutcome {
        if let Some(resolution) = resolution {
            if let Err(e) = self.grabs.resolve(&grab.id, resolution, &reason) {
                warn!(grab_id = %grab.id, error = %e, "Failed to record grab resolution");
            }
        }

        info!(
            grab_id = %grab.id,
            target_id = %grab.target_id,
            slot_id = %grab.slot.slot_id,
            decision = decision.as_str(),
            reason = %reason,
            "Import rejected"
        );

        self.history.append(HistoryEvent::ImportDecided {
            target_id: grab.target_id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            grab_id: grab.id.clone(),
            decision: decision.as_str().to_string(),
            reason: reason.clone(),
        });
        self.events.publish(PipelineEvent::ImportRejected {
            target_id: grab.target_id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            decision: decision.as_str().to_string(),
            reason: reason.clone(),
        });
        metrics::IMPORT_DECISIONS
            .with_label_values(&[decision.as_str()])
            .inc();

        unchanged(grab, decision, reason, quality)
    }

    async fn handle_download_failure(&self, item: &QueueItem) -> Result<ItemOutcome, ImportError> {
        let Some(grab) = self.grabs.find_by_job(&item.client, &item.job_id)? else {
            return Ok(ItemOutcome::Ignored);
        };
        let _guard = self.target_locks.lock(grab.target_id.clone()).await;

        let reason = item
            .error
            .clone()
            .unwrap_or_else(|| "download client reported an error".to_string());
        if !self.grabs.resolve(&grab.id, GrabResolution::DownloadFailed, &reason)? {
            return Ok(ItemOutcome::Ignored);
        }
        let failure_count = self
            .grabs
            .record_failure(&grab.target_id, &grab.slot.slot_id)?;

        warn!(
            grab_id = %grab.id,
            target_id = %grab.target_id,
            slot_id = %grab.slot.slot_id,
            client = %item.client,
            job_id = %item.job_id,
            failure_count,
            reason = %reason,
            "Download failed"
        );

        self.history.append(HistoryEvent::DownloadFailed {
            target_id: grab.target_id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            grab_id: grab.id.clone(),
            client: item.client.clone(),
            job_id: item.job_id.clone(),
            reason: reason.clone(),
        });
        self.events.publish(PipelineEvent::DownloadFailed {
            target_id: grab.target_id.clone(),
            slot_id: grab.slot.slot_id.clone(),
            reason,
        });

        Ok(ItemOutcome::DownloadFailed { grab_id: grab.id })
    }

    fn record_failure(&self, grab: &GrabRecord, err: &ImportError) {
        let stage = err.stage();
        warn!(
            grab_id = %grab.id,
            target_id = %grab.target_id,
            stage,
            error = %err,
            "Import failed, will retry on next scan"
        );
        metrics::IMPORT_FAILURES.with_label_values(&[stage]).inc();
        self.history.append(HistoryEvent::ImportFailed {
            target_id: grab.target_id.clone(),
            grab_id: grab.id.clone(),
            stage: stage.to_string(),
            error: err.to_string(),
        });
    }

    fn is_settled(&self, item: &QueueItem) -> bool {
        self.settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(item.client.clone(), item.job_id.clone()))
    }

    fn settle(&self, item: &QueueItem) {
        self.settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((item.client.clone(), item.job_id.clone()));
    }

    /// Drop settled jobs that have left a reachable client's queue.
    fn forget_departed(&self, snapshot: &QueueSnapshot) {
        self.settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(client, job_id)| {
                !snapshot.is_reachable(client)
                    || snapshot
                        .items
                        .iter()
                        .any(|i| &i.client == client && &i.job_id == job_id)
            });
    }
}

fn is_terminal(item: &QueueItem) -> bool {
    matches!(item.status, QueueStatus::Completed | QueueStatus::Error)
}

/// Outcome of a decision that left the library untouched.
fn unchanged(
    grab: &GrabRecord,
    decision: ImportDecision,
    reason: String,
    quality: ParsedQuality,
) -> ImportOutcome {
    ImportOutcome {
        grab_id: grab.id.clone(),
        target_id: grab.target_id.clone(),
        slot_id: grab.slot.slot_id.clone(),
        decision,
        reason,
        quality,
        path: None,
        replaced: None,
    }
}

/// Decide what to do with a downloaded file given the slot's current file.
fn decide(
    quality: &ParsedQuality,
    existing: Option<&LibraryFile>,
    profile: &QualityProfile,
    grab_id: &str,
) -> (ImportDecision, String) {
    let Some(existing) = existing else {
        return (ImportDecision::New, "slot has no file".to_string());
    };

    if existing.grab_id.as_deref() == Some(grab_id) {
        return (
            ImportDecision::RejectDuplicate,
            "file from this grab is already in the library".to_string(),
        );
    }

    let score = QualityScorer::score(quality, profile);
    let existing_rank = profile.rank_of(&existing.quality);

    if score.is_upgrade_over(existing_rank) {
        (
            ImportDecision::Upgrade,
            format!(
                "{} (rank {}) replaces {} (rank {})",
                quality, score.rank, existing.quality, existing_rank
            ),
        )
    } else if !profile.upgrades_allowed {
        (
            ImportDecision::RejectLowerQuality,
            format!("profile {} does not allow upgrades", profile.id),
        )
    } else {
        (
            ImportDecision::RejectLowerQuality,
            format!(
                "{} (rank {}) is not better than existing {} (rank {})",
                quality, score.rank, existing.quality, existing_rank
            ),
        )
    }
}

/// Apply the replaced-file policy. Returns whether the file was kept.
async fn dispose_replaced(path: &Path, policy: ReplacedFilePolicy) -> bool {
    match policy {
        ReplacedFilePolicy::Keep => true,
        ReplacedFilePolicy::Delete => {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed replaced file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove replaced file"
                    );
                }
            }
            false
        }
    }
}

/// Find the video file of a completed download: the reported path itself,
/// or the largest video file below it.
async fn locate_video(item: &QueueItem, config: &ImportConfig) -> Result<PathBuf, ImportError> {
    let root = item
        .content_path
        .clone()
        .or_else(|| item.save_path.as_ref().map(|p| p.join(&item.name)))
        .ok_or_else(|| ImportError::NoDownloadPath(item.name.clone()))?;

    let meta = fs::metadata(&root).await.map_err(|error| ImportError::Scan {
        path: root.clone(),
        error,
    })?;

    if meta.is_file() {
        return if is_video(&root, &config.video_extensions) {
            Ok(root)
        } else {
            Err(ImportError::NoVideoFile(root))
        };
    }

    let mut best: Option<(u64, PathBuf)> = None;
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        let scan_err = |error: std::io::Error| ImportError::Scan {
            path: dir.clone(),
            error,
        };
        let mut entries = fs::read_dir(&dir).await.map_err(scan_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
            let path = entry.path();
            let meta = entry.metadata().await.map_err(scan_err)?;
            if meta.is_dir() {
                pending.push(path);
            } else if is_video(&path, &config.video_extensions)
                && best.as_ref().map_or(true, |(size, _)| meta.len() > *size)
            {
                best = Some((meta.len(), path));
            }
        }
    }

    best.map(|(_, path)| path)
        .ok_or(ImportError::NoVideoFile(root))
}

fn is_video(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|v| v.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grab::SqliteGrabStore;
    use crate::history::{create_history_system, HistoryFilter, HistoryStore, SqliteHistoryStore};
    use crate::library::{MediaTarget, SqliteLibraryStore};
    use crate::quality::parse_quality;
    use crate::status::{Request, RequestStatus, RequestStore, SqliteRequestStore};
    use crate::testing::{fixtures, MockProbe, RecordingEventSink};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        pipeline: ImportPipeline,
        grabs: Arc<SqliteGrabStore>,
        library: Arc<SqliteLibraryStore>,
        requests: Arc<SqliteRequestStore>,
        history: Arc<SqliteHistoryStore>,
        events: Arc<RecordingEventSink>,
        config: Shared<Config>,
        temp: TempDir,
        writer: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        /// Write a download to disk and record the grab that produced it.
        async fn download(&self, grab_id: &str, job_id: &str, release_title: &str) -> QueueItem {
            let dir = self.temp.path().join("downloads").join(release_title);
            fs::create_dir_all(&dir).await.unwrap();
            fs::write(dir.join(format!("{}.mkv", release_title)), release_title.as_bytes())
                .await
                .unwrap();
            fs::write(dir.join("readme.nfo"), b"nfo").await.unwrap();

            let mut grab = fixtures::grab_record(grab_id, "m1", "hd", "qbit", job_id);
            grab.release.title = release_title.to_string();
            grab.release.quality = parse_quality(release_title);
            self.grabs.insert(&grab).unwrap();

            let mut item = fixtures::queue_item("qbit", job_id, QueueStatus::Completed);
            item.name = release_title.to_string();
            item.content_path = Some(dir);
            item
        }

        async fn history_types(self) -> Vec<String> {
            drop(self.pipeline);
            tokio::time::timeout(Duration::from_secs(5), self.writer)
                .await
                .unwrap()
                .unwrap();
            self.history
                .query(&HistoryFilter::new())
                .unwrap()
                .into_iter()
                .map(|r| r.event_type)
                .collect()
        }
    }

    fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let grabs = Arc::new(SqliteGrabStore::in_memory().unwrap());
        let library = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let requests = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let history = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let events = Arc::new(RecordingEventSink::new());
        let (handle, writer) = create_history_system(history.clone(), 64);
        let writer = tokio::spawn(writer.run());

        let mut config = Config::default();
        config.quality_profiles = fixtures::profiles();
        config.slots = fixtures::slots();
        config.import.library_root = temp.path().join("library");
        let config = Shared::new(config);

        library
            .upsert_target(&MediaTarget::movie("m1", "tt1", "Arrival", Some(2016)))
            .unwrap();
        let library_handle: Shared<dyn LibraryStore> =
            Shared::from_arc(library.clone() as Arc<dyn LibraryStore>);

        let status = Arc::new(StatusTracker::new(
            requests.clone(),
            library_handle.clone(),
            handle.clone(),
            events.clone(),
        ));
        let pipeline = ImportPipeline::new(
            grabs.clone(),
            library_handle,
            config.clone(),
            status,
            handle,
            events.clone(),
        );

        Harness {
            pipeline,
            grabs,
            library,
            requests,
            history,
            events,
            config,
            temp,
            writer,
        }
    }

    fn decided(outcome: ItemOutcome) -> ImportOutcome {
        match outcome {
            ItemOutcome::Decided(o) => o,
            other => panic!("expected a decision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_import_copies_largest_video_and_updates_request() {
        let h = harness();
        h.requests
            .insert(&Request::movie("r1", "tt1", "Arrival").with_status(RequestStatus::Searching))
            .unwrap();
        let item = h.download("g1", "job1", "Arrival.2016.1080p.WEB-DL.x264").await;

        let outcome = decided(h.pipeline.process_item(&item).await.unwrap());
        assert_eq!(outcome.decision, ImportDecision::New);

        let path = outcome.path.unwrap();
        assert!(path.starts_with(h.temp.path().join("library/Arrival (2016)")));
        assert_eq!(path.extension().unwrap(), "mkv");
        assert!(path.exists());
        // Copy mode leaves the download for seeding.
        assert!(item.content_path.as_ref().unwrap().join("Arrival.2016.1080p.WEB-DL.x264.mkv").exists());

        let file = h.library.file_for_slot("m1", "hd").unwrap().unwrap();
        assert_eq!(file.grab_id.as_deref(), Some("g1"));
        assert_eq!(
            h.grabs.resolution("g1").unwrap().unwrap().resolution,
            GrabResolution::Imported
        );
        assert_eq!(
            h.requests.get("r1").unwrap().unwrap().status,
            RequestStatus::Available
        );
        assert!(h.events.events().iter().any(|e| matches!(e, PipelineEvent::Imported { .. })));

        let types = h.history_types().await;
        assert!(types.contains(&"import_decided".to_string()));
        assert!(types.contains(&"file_imported".to_string()));
        assert!(types.contains(&"request_status_changed".to_string()));
    }

    #[tokio::test]
    async fn test_same_item_twice_is_duplicate() {
        let h = harness();
        let item = h.download("g1", "job1", "Arrival.2016.1080p.WEB-DL.x264").await;

        let first = decided(h.pipeline.process_item(&item).await.unwrap());
        let second = decided(h.pipeline.process_item(&item).await.unwrap());

        assert_eq!(first.decision, ImportDecision::New);
        assert_eq!(second.decision, ImportDecision::RejectDuplicate);
        assert!(second.path.is_none());
        assert_eq!(h.library.files_for_target("m1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_grab_seen_again_adds_no_history() {
        let h = harness();
        let item = h.download("g1", "job1", "Arrival.2016.1080p.WEB-DL.x264").await;
        decided(h.pipeline.process_item(&item).await.unwrap());

        // A restarted process meets the same finished job again
        for _ in 0..3 {
            let again = decided(h.pipeline.process_item(&item).await.unwrap());
            assert_eq!(again.decision, ImportDecision::RejectDuplicate);
        }

        assert!(!h
            .events
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::ImportRejected { .. })));
        let decided_count = h
            .history_types()
            .await
            .iter()
            .filter(|t| t.as_str() == "import_decided")
            .count();
        assert_eq!(decided_count, 1);
    }

    #[tokio::test]
    async fn test_upgrade_replaces_and_deletes_old_file() {
        let h = harness();
        let first = h.download("g1", "job1", "Arrival.2016.720p.WEB-DL.x264").await;
        let old_path = decided(h.pipeline.process_item(&first).await.unwrap())
            .path
            .unwrap();

        let second = h.download("g2", "job2", "Arrival.2016.1080p.WEB-DL.x264").await;
        let outcome = decided(h.pipeline.process_item(&second).await.unwrap());

        assert_eq!(outcome.decision, ImportDecision::Upgrade);
        assert_eq!(outcome.replaced.unwrap().path, old_path);
        assert!(!old_path.exists());
        assert!(outcome.path.unwrap().exists());
        assert_eq!(
            h.grabs.resolution("g2").unwrap().unwrap().resolution,
            GrabResolution::Upgraded
        );
        assert!(h.events.events().iter().any(|e| matches!(e, PipelineEvent::Upgraded { .. })));
    }

    #[tokio::test]
    async fn test_keep_policy_leaves_replaced_file() {
        let h = harness();
        let mut config = (*h.config.current()).clone();
        config.import.replaced_file_policy = ReplacedFilePolicy::Keep;
        h.config.replace(Arc::new(config));

        let first = h.download("g1", "job1", "Arrival.2016.720p.WEB-DL.x264").await;
        let old_path = decided(h.pipeline.process_item(&first).await.unwrap())
            .path
            .unwrap();
        let second = h.download("g2", "job2", "Arrival.2016.1080p.WEB-DL.x264").await;
        decided(h.pipeline.process_item(&second).await.unwrap());

        assert!(old_path.exists());
    }

    #[tokio::test]
    async fn test_lower_quality_is_rejected() {
        let h = harness();
        let first = h.download("g1", "job1", "Arrival.2016.1080p.WEB-DL.x264").await;
        decided(h.pipeline.process_item(&first).await.unwrap());

        let second = h.download("g2", "job2", "Arrival.2016.720p.HDTV.x264").await;
        let outcome = decided(h.pipeline.process_item(&second).await.unwrap());

        assert_eq!(outcome.decision, ImportDecision::RejectLowerQuality);
        assert_eq!(
            h.grabs.resolution("g2").unwrap().unwrap().resolution,
            GrabResolution::Rejected
        );
        let file = h.library.file_for_slot("m1", "hd").unwrap().unwrap();
        assert_eq!(file.grab_id.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn test_probe_overrides_title_quality() {
        let h = harness();
        let probe = Arc::new(MockProbe::new());
        probe.set_height(2160);
        let pipeline = ImportPipeline {
            probe: probe.clone(),
            ..h.pipeline
        };

        let item = {
            let dir = h.temp.path().join("downloads/x");
            fs::create_dir_all(&dir).await.unwrap();
            fs::write(dir.join("movie.mkv"), b"x").await.unwrap();
            let mut grab = fixtures::grab_record("g1", "m1", "hd", "qbit", "job1");
            grab.release.quality = parse_quality("Arrival.2016.720p.WEB-DL");
            h.grabs.insert(&grab).unwrap();
            let mut item = fixtures::queue_item("qbit", "job1", QueueStatus::Completed);
            item.content_path = Some(dir);
            item
        };

        let outcome = decided(pipeline.process_item(&item).await.unwrap());
        assert_eq!(outcome.quality.resolution, Some(crate::quality::Resolution::R2160));
        assert_eq!(probe.probed().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let h = harness();
        let mut grab = fixtures::grab_record("g1", "m1", "hd", "qbit", "job1");
        grab.release.quality = parse_quality("Arrival.2016.1080p.WEB-DL");
        h.grabs.insert(&grab).unwrap();
        let mut item = fixtures::queue_item("qbit", "job1", QueueStatus::Completed);
        item.content_path = Some(h.temp.path().join("not-there-yet"));

        let err = h.pipeline.process_item(&item).await.unwrap_err();
        assert_eq!(err.stage(), "locate");
        assert!(h.grabs.resolution("g1").unwrap().is_none());

        let dir = h.temp.path().join("not-there-yet");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("movie.mkv"), b"x").await.unwrap();

        let outcome = decided(h.pipeline.process_item(&item).await.unwrap());
        assert_eq!(outcome.decision, ImportDecision::New);

        let types = h.history_types().await;
        assert!(types.contains(&"import_failed".to_string()));
    }

    #[tokio::test]
    async fn test_error_item_resolves_download_failed_once() {
        let h = harness();
        h.grabs
            .insert(&fixtures::grab_record("g1", "m1", "hd", "qbit", "job1"))
            .unwrap();
        let mut item = fixtures::queue_item("qbit", "job1", QueueStatus::Error);
        item.error = Some("tracker unreachable".into());

        let outcome = h.pipeline.process_item(&item).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::DownloadFailed { .. }));
        assert_eq!(h.grabs.failure_count("m1", "hd").unwrap(), 1);

        let again = h.pipeline.process_item(&item).await.unwrap();
        assert!(matches!(again, ItemOutcome::Ignored));
        assert_eq!(h.grabs.failure_count("m1", "hd").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_ignores_foreign_jobs_and_settles_decisions() {
        let h = harness();
        let ours = h.download("g1", "job1", "Arrival.2016.1080p.WEB-DL.x264").await;
        let foreign = fixtures::queue_item("qbit", "someone-else", QueueStatus::Completed);
        let downloading = fixtures::queue_item("qbit", "job9", QueueStatus::Downloading);

        let snapshot = QueueSnapshot {
            taken_at: Utc::now(),
            items: vec![ours, foreign, downloading],
            unreachable: vec![],
        };

        let report = h.pipeline.scan(&snapshot).await;
        assert_eq!(report.items_seen, 3);
        assert_eq!(report.count(ImportDecision::New), 1);
        assert_eq!(report.failures, 0);

        let again = h.pipeline.scan(&snapshot).await;
        assert!(again.decisions.is_empty());
    }

    #[test]
    fn test_decide_without_upgrades() {
        let mut profile = fixtures::profiles().remove(0);
        profile.upgrades_allowed = false;
        let existing = LibraryFile {
            target_id: "m1".into(),
            slot_id: "hd".into(),
            path: "/lib/a.mkv".into(),
            size_bytes: 1,
            quality: parse_quality("720p WEB-DL"),
            release_title: "a".into(),
            grab_id: Some("g0".into()),
            imported_at: Utc::now(),
        };
        let (decision, reason) = decide(&parse_quality("1080p WEB-DL"), Some(&existing), &profile, "g1");
        assert_eq!(decision, ImportDecision::RejectLowerQuality);
        assert!(reason.contains("does not allow upgrades"));
    }
}
