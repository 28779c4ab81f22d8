//! Search a media target and grab what its slots still need.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::grab::{GrabOrchestrator, GrabStore};
use crate::history::{HistoryEvent, HistoryHandle};
use crate::library::{LibraryStore, MediaTarget};
use crate::metadata::MetadataProvider;
use crate::searcher::{RoutingMode, SearchQuery, SearchRouter};
use crate::shared::Shared;
use crate::slots::{effective_slots, Slot, SlotMatcher, SlotState};
use crate::status::StatusTracker;

use super::{
    AcquisitionError, GrabAttempt, SearchReport, SearchTrigger, SlotGrab, SweepReport,
};

/// Runs the search → assign → grab cycle for manual searches and the
/// autosearch sweep.
pub struct AcquisitionService {
    router: Arc<SearchRouter>,
    orchestrator: Arc<GrabOrchestrator>,
    library: Shared<dyn LibraryStore>,
    config: Shared<Config>,
    status: Arc<StatusTracker>,
    history: HistoryHandle,
    metadata: Option<Arc<dyn MetadataProvider>>,
}

impl AcquisitionService {
    pub fn new(
        router: Arc<SearchRouter>,
        orchestrator: Arc<GrabOrchestrator>,
        library: Shared<dyn LibraryStore>,
        config: Shared<Config>,
        status: Arc<StatusTracker>,
        history: HistoryHandle,
    ) -> Self {
        Self {
            router,
            orchestrator,
            library,
            config,
            status,
            history,
            metadata: None,
        }
    }

    /// Use the provider's title in search queries.
    pub fn with_metadata(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    /// Search one target and grab the chosen candidate of every slot.
    ///
    /// When no slot wants a file the sources are not queried at all.
    pub async fn search_target(
        &self,
        target_id: &str,
        mode: RoutingMode,
        trigger: SearchTrigger,
    ) -> Result<SearchReport, AcquisitionError> {
        let library = self.library.current();
        let target = library
            .get_target(target_id)?
            .ok_or_else(|| AcquisitionError::TargetNotFound(target_id.to_string()))?;
        let config = self.config.current();

        let (slots, exhausted_slots) = self.searchable_slots(&config, &target, trigger)?;
        let states = self.slot_states(library.as_ref(), &target, &slots)?;

        let wanted = SlotMatcher::assign_slots(&target, &slots, &config.quality_profiles, &states, &[]);
        if wanted.unmet().next().is_none() {
            debug!(target_id, trigger = trigger.as_str(), "No slot wants a file, search skipped");
            return Ok(SearchReport {
                target_id: target.id.clone(),
                trigger,
                mode,
                query: None,
                candidates: 0,
                assignment: wanted,
                grabs: Vec::new(),
                exhausted_slots,
            });
        }

        let title = self.lookup_title(&target).await;
        let query = SearchQuery::for_target(&target, title.as_deref());
        let outcome = self.router.search(&query, mode).await;

        self.history.append(HistoryEvent::SearchExecuted {
            target_id: Some(target.id.clone()),
            query: query.text.clone(),
            mode: mode.as_str().to_string(),
            sources_queried: outcome.sources_queried.clone(),
            candidates: outcome.candidates.len() as u32,
            duration_ms: outcome.duration_ms,
            source_errors: outcome.source_errors.clone(),
        });

        let assignment = SlotMatcher::assign_slots(
            &target,
            &slots,
            &config.quality_profiles,
            &states,
            &outcome.candidates,
        );

        let mut grabs = Vec::new();
        for (slot, chosen) in assignment.chosen() {
            let attempt = match self.orchestrator.grab(&target, slot, &chosen.candidate).await {
                Ok(record) => GrabAttempt::Grabbed {
                    grab_id: record.id,
                    release_title: record.release.title,
                },
                Err(e) => GrabAttempt::Failed {
                    release_title: chosen.candidate.title.clone(),
                    error: e.to_string(),
                },
            };
            grabs.push(SlotGrab {
                slot_id: slot.id.clone(),
                attempt,
            });
        }

        let report = SearchReport {
            target_id: target.id.clone(),
            trigger,
            mode,
            query: Some(query.text),
            candidates: outcome.candidates.len(),
            assignment,
            grabs,
            exhausted_slots,
        };

        if report.grabbed() > 0 {
            if let Err(e) = self.status.mark_searching(&target.catalog_id) {
                warn!(
                    catalog_id = %target.catalog_id,
                    error = %e,
                    "Failed to update request status"
                );
            }
        }

        info!(
            target_id = %target.id,
            trigger = trigger.as_str(),
            mode = mode.as_str(),
            candidates = report.candidates,
            grabbed = report.grabbed(),
            failed = report.failed(),
            "Target searched"
        );
        Ok(report)
    }

    /// Search every monitored target with the configured routing mode.
    ///
    /// A target that cannot be searched is reported and the sweep goes on.
    pub async fn sweep(&self) -> Result<SweepReport, AcquisitionError> {
        let targets = self.library.current().monitored_targets()?;
        let mode = self.config.current().searcher.routing_mode;
        let mut report = SweepReport {
            targets: targets.len(),
            ..Default::default()
        };

        for target in targets {
            match self
                .search_target(&target.id, mode, SearchTrigger::Autosearch)
                .await
            {
                Ok(result) => {
                    if result.searched() {
                        report.searched += 1;
                    }
                    report.grabbed += result.grabbed();
                    report.grab_failures += result.failed();
                }
                Err(e) => {
                    warn!(target_id = %target.id, error = %e, "Autosearch failed for target");
                    report.errors.push((target.id.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Effective slots for the target. Autosearch disables slots whose
    /// failed-grab budget is spent and reports them separately.
    fn searchable_slots(
        &self,
        config: &Config,
        target: &MediaTarget,
        trigger: SearchTrigger,
    ) -> Result<(Vec<Slot>, Vec<String>), AcquisitionError> {
        let mut slots = effective_slots(&config.slots, &target.slot_overrides);
        let mut exhausted = Vec::new();
        if trigger == SearchTrigger::Manual {
            return Ok((slots, exhausted));
        }

        let limit = config.grab.max_failed_attempts;
        let grabs = self.orchestrator.store();
        for slot in slots.iter_mut().filter(|s| s.enabled) {
            let failures = grabs.failure_count(&target.id, &slot.id)?;
            if failures >= limit {
                debug!(
                    target_id = %target.id,
                    slot_id = %slot.id,
                    failures,
                    "Slot exhausted its grab attempts"
                );
                slot.enabled = false;
                exhausted.push(slot.id.clone());
            }
        }
        Ok((slots, exhausted))
    }

    fn slot_states(
        &self,
        library: &dyn LibraryStore,
        target: &MediaTarget,
        slots: &[Slot],
    ) -> Result<HashMap<String, SlotState>, AcquisitionError> {
        let grabs: &Arc<dyn GrabStore> = self.orchestrator.store();
        let mut states = HashMap::with_capacity(slots.len());
        for slot in slots {
            let existing = library
                .file_for_slot(&target.id, &slot.id)?
                .map(|file| file.quality);
            let pending_grab = self.orchestrator.is_grabbing(&target.id, &slot.id)
                || grabs.pending_for(&target.id, &slot.id)?.is_some();
            states.insert(
                slot.id.clone(),
                SlotState {
                    existing,
                    pending_grab,
                },
            );
        }
        Ok(states)
    }

    async fn lookup_title(&self, target: &MediaTarget) -> Option<String> {
        let provider = self.metadata.as_ref()?;
        match provider.lookup(&target.catalog_id).await {
            Ok(metadata) => Some(metadata.title),
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    catalog_id = %target.catalog_id,
                    error = %e,
                    "Metadata lookup failed, searching with library title"
                );
                None
            }
        }
    }
}
