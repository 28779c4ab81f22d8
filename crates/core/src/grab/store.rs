use super::{GrabRecord, GrabResolution, GrabStoreError, ResolutionRecord};

/// Persistent grab records, resolutions and per-slot failure counters.
pub trait GrabStore: Send + Sync {
    fn insert(&self, record: &GrabRecord) -> Result<(), GrabStoreError>;

    fn get(&self, id: &str) -> Result<Option<GrabRecord>, GrabStoreError>;

    /// Most recent grab matching a client job.
    fn find_by_job(&self, client: &str, job_id: &str) -> Result<Option<GrabRecord>, GrabStoreError>;

    /// Most recent unresolved grab for a slot.
    fn pending_for(&self, target_id: &str, slot_id: &str) -> Result<Option<GrabRecord>, GrabStoreError>;

    fn unresolved(&self) -> Result<Vec<GrabRecord>, GrabStoreError>;

    /// Record the outcome of a grab. Returns false (and changes nothing) if
    /// the grab was already resolved.
    fn resolve(
        &self,
        grab_id: &str,
        resolution: GrabResolution,
        reason: &str,
    ) -> Result<bool, GrabStoreError>;

    fn resolution(&self, grab_id: &str) -> Result<Option<ResolutionRecord>, GrabStoreError>;

    /// Count a failed attempt for a slot; returns the new count.
    fn record_failure(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError>;

    fn failure_count(&self, target_id: &str, slot_id: &str) -> Result<u32, GrabStoreError>;

    fn clear_failures(&self, target_id: &str, slot_id: &str) -> Result<(), GrabStoreError>;
}
