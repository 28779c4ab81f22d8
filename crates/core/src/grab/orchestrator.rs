//! Grab orchestration: one submission at a time per (target, slot).

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::download_client::ClientRegistry;
use crate::events::{EventSink, PipelineEvent};
use crate::history::{HistoryEvent, HistoryHandle};
use crate::library::MediaTarget;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::metrics;
use crate::searcher::CandidateRelease;
use crate::shared::Shared;
use crate::slots::{Slot, SlotSnapshot};

use super::{GrabError, GrabRecord, GrabStore, ReleaseSnapshot};

type SlotKey = (String, String);

pub struct GrabOrchestrator {
    inner: Arc<Inner>,
    locks: KeyedLocks<SlotKey>,
}

struct Inner {
    store: Arc<dyn GrabStore>,
    clients: ClientRegistry,
    config: Shared<Config>,
    history: HistoryHandle,
    events: Arc<dyn EventSink>,
}

impl GrabOrchestrator {
    pub fn new(
        store: Arc<dyn GrabStore>,
        clients: ClientRegistry,
        config: Shared<Config>,
        history: HistoryHandle,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clients,
                config,
                history,
                events,
            }),
            locks: KeyedLocks::new(),
        }
    }

    /// Whether a grab for the slot is currently being submitted.
    pub fn is_grabbing(&self, target_id: &str, slot_id: &str) -> bool {
        self.locks
            .is_locked(&(target_id.to_string(), slot_id.to_string()))
    }

    pub fn store(&self) -> &Arc<dyn GrabStore> {
        &self.inner.store
    }

    /// Submit `candidate` for `slot` of `target`.
    ///
    /// A second call for the same (target, slot) while one is in progress
    /// fails immediately with [`GrabError::Conflict`]. The submission runs in
    /// its own task holding the slot claim, so dropping the returned future
    /// does not abandon a half-submitted grab.
    pub async fn grab(
        &self,
        target: &MediaTarget,
        slot: &Slot,
        candidate: &CandidateRelease,
    ) -> Result<GrabRecord, GrabError> {
        let key = (target.id.clone(), slot.id.clone());
        let guard = match self.locks.try_lock(key) {
            Some(guard) => guard,
            None => {
                metrics::GRABS_TOTAL.with_label_values(&["conflict"]).inc();
                warn!(target_id = %target.id, slot_id = %slot.id, "Grab already in progress");
                return Err(GrabError::Conflict {
                    target_id: target.id.clone(),
                    slot_id: slot.id.clone(),
                });
            }
        };

        let inner = Arc::clone(&self.inner);
        let target_id = target.id.clone();
        let slot = SlotSnapshot::from(slot);
        let candidate = candidate.clone();

        tokio::spawn(async move { inner.submit(guard, target_id, slot, candidate).await })
            .await
            .map_err(|e| GrabError::Internal(format!("grab task failed: {}", e)))?
    }
}

impl Inner {
    async fn submit(
        &self,
        _guard: KeyGuard<SlotKey>,
        target_id: String,
        slot: SlotSnapshot,
        candidate: CandidateRelease,
    ) -> Result<GrabRecord, GrabError> {
        // A search that started before an earlier grab for this slot landed
        // still sees the slot as open; the store is authoritative here.
        if let Some(existing) = self.store.pending_for(&target_id, &slot.slot_id)? {
            metrics::GRABS_TOTAL.with_label_values(&["conflict"]).inc();
            warn!(
                target_id = %target_id,
                slot_id = %slot.slot_id,
                grab_id = %existing.id,
                "Slot already has a pending grab"
            );
            return Err(GrabError::AlreadyPending {
                target_id,
                slot_id: slot.slot_id,
                grab_id: existing.id,
            });
        }

        let preferred = self.config.current().grab.download_client.clone();

        let client = match self.clients.select(preferred.as_deref()) {
            Some(client) => client,
            None => {
                let err = GrabError::NoDownloadClient(
                    preferred.unwrap_or_else(|| "none configured".to_string()),
                );
                self.fail(&target_id, &slot, &candidate, "-", &err);
                return Err(err);
            }
        };

        if candidate.download_link().is_none() {
            let err = GrabError::NoDownloadLink(candidate.title.clone());
            self.fail(&target_id, &slot, &candidate, client.name(), &err);
            return Err(err);
        }

        let job_id = match client.submit(&candidate).await {
            Ok(job_id) => job_id,
            Err(e) => {
                let err = GrabError::Submission(e.to_string());
                self.fail(&target_id, &slot, &candidate, client.name(), &err);
                return Err(err);
            }
        };

        let record = GrabRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_id,
            slot,
            release: ReleaseSnapshot::from(&candidate),
            client: client.name().to_string(),
            job_id,
            grabbed_at: Utc::now(),
        };

        if let Err(e) = self.store.insert(&record) {
            error!(
                grab_id = %record.id,
                client = %record.client,
                job_id = %record.job_id,
                error = %e,
                "Failed to persist grab record"
            );
            // Unrecorded jobs would never be imported and the slot would be
            // grabbed again, so take the job back out of the client.
            if let Err(remove_err) = client.remove(&record.job_id, true).await {
                error!(
                    client = %record.client,
                    job_id = %record.job_id,
                    error = %remove_err,
                    "Failed to remove unrecorded job from download client"
                );
            }
            let err = GrabError::Store(e);
            self.fail(&record.target_id, &record.slot, &candidate, &record.client, &err);
            return Err(err);
        }
        if let Err(e) = self
            .store
            .clear_failures(&record.target_id, &record.slot.slot_id)
        {
            warn!(error = %e, "Failed to reset grab failure counter");
        }

        self.history.append(HistoryEvent::Grabbed {
            target_id: record.target_id.clone(),
            slot_id: record.slot.slot_id.clone(),
            grab_id: record.id.clone(),
            release_title: record.release.title.clone(),
            quality: record.release.quality.to_string(),
            client: record.client.clone(),
            job_id: record.job_id.clone(),
        });
        self.events.publish(PipelineEvent::Grabbed {
            target_id: record.target_id.clone(),
            slot_id: record.slot.slot_id.clone(),
            grab_id: record.id.clone(),
            release_title: record.release.title.clone(),
        });
        metrics::GRABS_TOTAL.with_label_values(&["submitted"]).inc();

        info!(
            grab_id = %record.id,
            target_id = %record.target_id,
            slot_id = %record.slot.slot_id,
            client = %record.client,
            job_id = %record.job_id,
            release = %record.release.title,
            "Release grabbed"
        );

        Ok(record)
    }

    fn fail(
        &self,
        target_id: &str,
        slot: &SlotSnapshot,
        candidate: &CandidateRelease,
        client: &str,
        err: &GrabError,
    ) {
        let failure_count = match self.store.record_failure(target_id, &slot.slot_id) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to record grab failure");
                0
            }
        };

        warn!(
            target_id = %target_id,
            slot_id = %slot.slot_id,
            release = %candidate.title,
            failure_count,
            error = %err,
            "Grab failed"
        );

        self.history.append(HistoryEvent::GrabFailed {
            target_id: target_id.to_string(),
            slot_id: slot.slot_id.clone(),
            release_title: candidate.title.clone(),
            client: client.to_string(),
            error: err.to_string(),
            failure_count,
        });
        metrics::GRABS_TOTAL.with_label_values(&["failed"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download_client::DownloadClient;
    use crate::grab::{GrabResolution, GrabStoreError, ResolutionRecord, SqliteGrabStore};
    use crate::history::{create_history_system, HistoryFilter, HistoryStore, SqliteHistoryStore};
    use crate::testing::{fixtures, MockDownloadClient, RecordingEventSink};
    use std::time::Duration;

    struct Harness {
        orchestrator: GrabOrchestrator,
        client: Arc<MockDownloadClient>,
        store: Arc<SqliteGrabStore>,
        events: Arc<RecordingEventSink>,
        history: Arc<SqliteHistoryStore>,
        writer: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let store = Arc::new(SqliteGrabStore::in_memory().unwrap());
        let events = Arc::new(RecordingEventSink::new());
        let history = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let (handle, writer) = create_history_system(history.clone(), 64);
        let writer = tokio::spawn(writer.run());

        let orchestrator = GrabOrchestrator::new(
            store.clone(),
            ClientRegistry::new(vec![client.clone()]),
            Shared::new(Config::default()),
            handle,
            events.clone(),
        );
        Harness {
            orchestrator,
            client,
            store,
            events,
            history,
            writer,
        }
    }

    impl Harness {
        async fn flush_history(self) -> Arc<SqliteHistoryStore> {
            drop(self.orchestrator);
            self.writer.await.unwrap();
            self.history
        }
    }

    fn hd_slot() -> Slot {
        fixtures::slots().remove(0)
    }

    #[tokio::test]
    async fn test_successful_grab_persists_and_notifies() {
        let h = harness();
        let target = fixtures::movie_target("m1");
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");

        let record = h.orchestrator.grab(&target, &hd_slot(), &candidate).await.unwrap();

        assert_eq!(record.target_id, "m1");
        assert_eq!(record.slot.slot_id, "hd");
        assert_eq!(record.client, "qbit");
        assert_eq!(h.client.submitted().len(), 1);
        assert_eq!(h.store.get(&record.id).unwrap(), Some(record.clone()));
        assert!(matches!(
            h.events.events().as_slice(),
            [PipelineEvent::Grabbed { grab_id, .. }] if grab_id == &record.id
        ));
        assert!(!h.orchestrator.is_grabbing("m1", "hd"));

        let history = h.flush_history().await;
        let grabbed = history
            .query(&HistoryFilter::new().with_event_type("grabbed"))
            .unwrap();
        assert_eq!(grabbed.len(), 1);
        assert_eq!(grabbed[0].media_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_concurrent_grab_for_same_slot_conflicts() {
        let h = harness();
        h.client.set_submit_delay(Duration::from_millis(100));
        let target = fixtures::movie_target("m1");
        let slot = hd_slot();
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");

        let (first, second) = tokio::join!(
            h.orchestrator.grab(&target, &slot, &candidate),
            h.orchestrator.grab(&target, &slot, &candidate),
        );

        let results = [first, second];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(GrabError::Conflict { .. })))
            .count();
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(h.client.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_different_slots_do_not_conflict() {
        let h = harness();
        h.client.set_submit_delay(Duration::from_millis(50));
        let target = fixtures::movie_target("m1");
        let slots = fixtures::slots();
        let a = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");
        let b = fixtures::candidate("Some.Movie.2021.2160p.WEB-DL.x265-GRP", 9_000, "alpha");

        let (first, second) = tokio::join!(
            h.orchestrator.grab(&target, &slots[0], &a),
            h.orchestrator.grab(&target, &slots[1], &b),
        );
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_submission_failure_counts_and_records_nothing() {
        let h = harness();
        h.client.set_next_error("connection refused");
        let target = fixtures::movie_target("m1");
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");

        let err = h
            .orchestrator
            .grab(&target, &hd_slot(), &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, GrabError::Submission(ref msg) if msg.contains("connection refused")));
        assert!(h.store.unresolved().unwrap().is_empty());
        assert_eq!(h.store.failure_count("m1", "hd").unwrap(), 1);
        assert!(h.events.events().is_empty());

        // A later success clears the counter
        h.orchestrator.grab(&target, &hd_slot(), &candidate).await.unwrap();
        assert_eq!(h.store.failure_count("m1", "hd").unwrap(), 0);

        let history = h.flush_history().await;
        assert_eq!(
            history
                .count(&HistoryFilter::new().with_event_type("grab_failed"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_candidate_without_link_fails() {
        let h = harness();
        let mut candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL", 4_000, "alpha");
        candidate.magnet_uri = None;
        candidate.download_url = None;

        let err = h
            .orchestrator
            .grab(&fixtures::movie_target("m1"), &hd_slot(), &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, GrabError::NoDownloadLink(_)));
        assert!(h.client.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_slot_with_recorded_pending_grab_is_not_submitted_again() {
        let h = harness();
        h.store
            .insert(&fixtures::grab_record("g-earlier", "m1", "hd", "qbit", "job-earlier"))
            .unwrap();
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");

        let err = h
            .orchestrator
            .grab(&fixtures::movie_target("m1"), &hd_slot(), &candidate)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GrabError::AlreadyPending { ref grab_id, .. } if grab_id == "g-earlier"
        ));
        assert!(h.client.submitted().is_empty());
        assert_eq!(h.store.unresolved().unwrap().len(), 1);
        assert_eq!(h.store.failure_count("m1", "hd").unwrap(), 0);
    }

    /// Delegates to a real store but refuses to insert.
    struct InsertFailingStore(SqliteGrabStore);

    impl GrabStore for InsertFailingStore {
        fn insert(&self, _record: &GrabRecord) -> Result<(), GrabStoreError> {
            Err(GrabStoreError::Database("disk I/O error".to_string()))
        }
        fn get(&self, id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
            self.0.get(id)
        }
        fn find_by_job(&self, client: &str, job_id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
            self.0.find_by_job(client, job_id)
        }
        fn pending_for(&self, target_id: &str, slot_id: &str) -> Result<Option<GrabRecord>, GrabStoreError> {
            self.0.pending_for(target_id, slot_id)
        }
        fn unresolved(&self) -> Result<Vec<GrabRecord>, GrabStoreError> {
            self.0.unresolved()
        }
        fn resolve(
            &self,
            grab_id: &str,
            resolution: GrabResolution,
            reason: &str,
        ) -> Result<bool, GrabStoreError> {
            self.0.resolve(grab_id, resolution, reason)
        }
        fn resolution(&self, grab_id: &str) -> Result<Option<ResolutionRecord>, GrabStoreError> {
            self.0.resolution(grab_id)
        }
        fn record_failure(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError> {
            self.0.record_failure(target_id, slot_id)
        }
        fn failure_count(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError> {
            self.0.failure_count(target_id, slot_id)
        }
        fn clear_failures(&self, target_id: &str, slot_id: &str) -> Result<(), GrabStoreError> {
            self.0.clear_failures(target_id, slot_id)
        }
    }

    #[tokio::test]
    async fn test_unpersisted_grab_is_removed_from_client() {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let store = Arc::new(InsertFailingStore(SqliteGrabStore::in_memory().unwrap()));
        let events = Arc::new(RecordingEventSink::new());
        let history = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let (handle, _writer) = create_history_system(history, 64);
        let orchestrator = GrabOrchestrator::new(
            store.clone(),
            ClientRegistry::new(vec![client.clone()]),
            Shared::new(Config::default()),
            handle,
            events.clone(),
        );
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL.x264-GRP", 4_000, "alpha");

        let err = orchestrator
            .grab(&fixtures::movie_target("m1"), &hd_slot(), &candidate)
            .await
            .unwrap_err();

        assert!(matches!(err, GrabError::Store(_)));
        assert_eq!(client.submitted().len(), 1);
        let actions = client.actions();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].starts_with("remove:") && actions[0].ends_with(":true"));
        assert!(client.queue().await.unwrap().is_empty());
        assert_eq!(store.failure_count("m1", "hd").unwrap(), 1);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_abort_submission() {
        let h = harness();
        h.client.set_submit_delay(Duration::from_millis(50));
        let target = fixtures::movie_target("m1");
        let candidate = fixtures::candidate("Some.Movie.2021.1080p.WEB-DL", 4_000, "alpha");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            h.orchestrator.grab(&target, &hd_slot(), &candidate),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.client.submitted().len(), 1);
        assert_eq!(h.store.unresolved().unwrap().len(), 1);
        assert!(!h.orchestrator.is_grabbing("m1", "hd"));
    }
}
