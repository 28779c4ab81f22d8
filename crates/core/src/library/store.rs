use super::{LibraryError, LibraryFile, MediaTarget};

/// Persistent library state: media targets and the files held per slot.
pub trait LibraryStore: Send + Sync {
    fn get_target(&self, id: &str) -> Result<Option<MediaTarget>, LibraryError>;

    /// Insert or replace a media target.
    fn upsert_target(&self, target: &MediaTarget) -> Result<(), LibraryError>;

    /// Update only the monitored flag. Returns the updated target.
    fn set_monitored(&self, id: &str, monitored: bool) -> Result<MediaTarget, LibraryError>;

    /// All monitored targets, in a stable order.
    fn monitored_targets(&self) -> Result<Vec<MediaTarget>, LibraryError>;

    /// Every target (movie or episode) sharing a catalog id.
    fn targets_for_catalog(&self, catalog_id: &str) -> Result<Vec<MediaTarget>, LibraryError>;

    fn files_for_target(&self, target_id: &str) -> Result<Vec<LibraryFile>, LibraryError>;

    fn file_for_slot(
        &self,
        target_id: &str,
        slot_id: &str,
    ) -> Result<Option<LibraryFile>, LibraryError>;

    /// Store `file` as the file for its (target, slot), returning the file it
    /// replaced, if any.
    fn put_file(&self, file: &LibraryFile) -> Result<Option<LibraryFile>, LibraryError>;
}
