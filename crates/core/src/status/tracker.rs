//! Request fulfillment tracking.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::events::{EventSink, PipelineEvent};
use crate::history::{HistoryEvent, HistoryHandle};
use crate::library::{LibraryStore, MediaKind, MediaTarget};
use crate::metadata::MetadataProvider;
use crate::metrics;
use crate::shared::Shared;

use super::{
    LibraryChange, RefreshReport, Request, RequestError, RequestKind, RequestStatus, RequestStore,
    StatusTransition,
};

/// Maps library changes back to the requests that asked for them.
pub struct StatusTracker {
    requests: Arc<dyn RequestStore>,
    library: Shared<dyn LibraryStore>,
    history: HistoryHandle,
    events: Arc<dyn EventSink>,
    metadata: Option<Arc<dyn MetadataProvider>>,
}

impl StatusTracker {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        library: Shared<dyn LibraryStore>,
        history: HistoryHandle,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            requests,
            library,
            history,
            events,
            metadata: None,
        }
    }

    /// Grow series episode sets from this provider during `refresh_all`.
    pub fn with_metadata(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    pub fn requests(&self) -> &Arc<dyn RequestStore> {
        &self.requests
    }

    /// Recompute every open request for the changed catalog id.
    pub fn on_library_change(
        &self,
        change: &LibraryChange,
    ) -> Result<Vec<StatusTransition>, RequestError> {
        let requests = self.requests.open_for_catalog(change.catalog_id())?;
        debug!(
            change = change.kind(),
            catalog_id = change.catalog_id(),
            requests = requests.len(),
            "Library change received"
        );

        let mut transitions = Vec::new();
        for request in requests {
            if let Some(t) = self.recompute(&request)? {
                transitions.push(t);
            }
        }
        Ok(transitions)
    }

    /// Toggle monitoring of a target and re-evaluate affected requests.
    pub fn set_monitored(
        &self,
        target_id: &str,
        monitored: bool,
    ) -> Result<Vec<StatusTransition>, RequestError> {
        let target = self.library.current().set_monitored(target_id, monitored)?;
        self.on_library_change(&LibraryChange::MonitoringChanged {
            target_id: target.id,
            catalog_id: target.catalog_id,
        })
    }

    /// Move approved requests for a catalog id to `searching`.
    pub fn mark_searching(&self, catalog_id: &str) -> Result<Vec<StatusTransition>, RequestError> {
        let mut transitions = Vec::new();
        for request in self.requests.open_for_catalog(catalog_id)? {
            if request.status == RequestStatus::Approved {
                transitions.push(self.transition(&request, RequestStatus::Searching)?);
            }
        }
        Ok(transitions)
    }

    /// Recompute every open request, first growing series episode lists
    /// from metadata when a provider is configured.
    pub async fn refresh_all(&self) -> Result<RefreshReport, RequestError> {
        let requests = self.requests.open_requests()?;
        let mut report = RefreshReport {
            requests_checked: requests.len(),
            ..Default::default()
        };

        if let Some(provider) = &self.metadata {
            let mut seen = BTreeSet::new();
            for request in &requests {
                let RequestKind::Series { seasons } = &request.kind else {
                    continue;
                };
                if !seen.insert(request.catalog_id.clone()) {
                    continue;
                }
                match self
                    .grow_episodes(provider.as_ref(), request, seasons)
                    .await
                {
                    Ok((added, mut transitions)) => {
                        report.episodes_added += added;
                        report.transitions.append(&mut transitions);
                    }
                    Err(e) => {
                        warn!(
                            catalog_id = %request.catalog_id,
                            error = %e,
                            "Metadata lookup failed"
                        );
                        report.lookup_failures.push(request.catalog_id.clone());
                    }
                }
            }
        }

        for request in &requests {
            // Re-read so a change made by `grow_episodes` is not applied twice.
            let Some(current) = self.requests.get(&request.id)? else {
                continue;
            };
            if let Some(t) = self.recompute(&current)? {
                report.transitions.push(t);
            }
        }

        info!(
            requests = report.requests_checked,
            transitions = report.transitions.len(),
            episodes_added = report.episodes_added,
            "Availability refresh complete"
        );
        Ok(report)
    }

    /// Status the request should have given current library state, or
    /// `None` if nothing has been filed yet.
    pub fn evaluate(&self, request: &Request) -> Result<Option<RequestStatus>, RequestError> {
        let library = self.library.current();
        let targets = library.targets_for_catalog(&request.catalog_id)?;

        match &request.kind {
            RequestKind::Movie => {
                for target in targets.iter().filter(|t| t.kind == MediaKind::Movie) {
                    if !library.files_for_target(&target.id)?.is_empty() {
                        return Ok(Some(RequestStatus::Available));
                    }
                }
                Ok(None)
            }
            RequestKind::Series { seasons } => {
                let episodes: Vec<&MediaTarget> = targets
                    .iter()
                    .filter(|t| t.kind == MediaKind::Episode)
                    .collect();

                let requested: BTreeSet<u32> = if seasons.is_empty() {
                    episodes.iter().filter_map(|e| e.season).collect()
                } else {
                    seasons.clone()
                };
                if requested.is_empty() {
                    return Ok(None);
                }

                let mut complete = true;
                let mut any_file = false;

                for season in &requested {
                    let in_season: Vec<&&MediaTarget> = episodes
                        .iter()
                        .filter(|e| e.season == Some(*season))
                        .collect();

                    let mut required = 0usize;
                    for episode in in_season {
                        let has_file = !library.files_for_target(&episode.id)?.is_empty();
                        any_file |= has_file;
                        if episode.monitored {
                            required += 1;
                            complete &= has_file;
                        }
                    }
                    // No known monitored episodes: the season cannot be complete.
                    if required == 0 {
                        complete = false;
                    }
                }

                Ok(if complete {
                    Some(RequestStatus::Available)
                } else if any_file {
                    Some(RequestStatus::PartiallyAvailable)
                } else {
                    None
                })
            }
        }
    }

    fn recompute(&self, request: &Request) -> Result<Option<StatusTransition>, RequestError> {
        match self.evaluate(request)? {
            Some(status) if status != request.status => {
                self.transition(request, status).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn transition(
        &self,
        request: &Request,
        to: RequestStatus,
    ) -> Result<StatusTransition, RequestError> {
        self.requests.update_status(&request.id, to)?;

        let transition = StatusTransition {
            request_id: request.id.clone(),
            catalog_id: request.catalog_id.clone(),
            from: request.status,
            to,
        };

        info!(
            request_id = %request.id,
            catalog_id = %request.catalog_id,
            from = %transition.from,
            to = %transition.to,
            "Request status changed"
        );
        metrics::REQUEST_STATUS_CHANGES
            .with_label_values(&[to.as_str()])
            .inc();
        self.history.append(HistoryEvent::RequestStatusChanged {
            request_id: request.id.clone(),
            catalog_id: request.catalog_id.clone(),
            from: transition.from.to_string(),
            to: to.to_string(),
        });
        self.events.publish(PipelineEvent::RequestStatusChanged {
            request_id: request.id.clone(),
            from: transition.from.to_string(),
            to: to.to_string(),
        });

        Ok(transition)
    }

    /// Add library episodes that metadata knows about but the library does
    /// not. Returns how many were added and the resulting status changes.
    async fn grow_episodes(
        &self,
        provider: &dyn MetadataProvider,
        request: &Request,
        seasons: &BTreeSet<u32>,
    ) -> Result<(usize, Vec<StatusTransition>), RequestError> {
        let metadata = provider.lookup(&request.catalog_id).await?;

        let library = self.library.current();
        let existing: BTreeSet<(u32, u32)> = library
            .targets_for_catalog(&request.catalog_id)?
            .into_iter()
            .filter_map(|t| Some((t.season?, t.episode?)))
            .collect();

        let mut added = Vec::new();
        for season in &metadata.seasons {
            if !seasons.is_empty() && !seasons.contains(&season.number) {
                continue;
            }
            for episode in &season.episodes {
                if existing.contains(&(season.number, episode.number)) {
                    continue;
                }
                let target = MediaTarget::episode(
                    format!("{}-s{:02}e{:02}", request.catalog_id, season.number, episode.number),
                    request.catalog_id.clone(),
                    metadata.title.clone(),
                    season.number,
                    episode.number,
                );
                library.upsert_target(&target)?;
                added.push(target.id);
            }
        }

        if !added.is_empty() {
            info!(
                catalog_id = %request.catalog_id,
                episodes = added.len(),
                "Series episode set grew"
            );
            let count = added.len();
            let transitions = self.on_library_change(&LibraryChange::EpisodesAdded {
                catalog_id: request.catalog_id.clone(),
                target_ids: added,
            })?;
            return Ok((count, transitions));
        }
        Ok((0, Vec::new()))
    }
}
