use super::{Request, RequestError, RequestStatus};

/// Persistent external requests.
pub trait RequestStore: Send + Sync {
    fn insert(&self, request: &Request) -> Result<(), RequestError>;

    fn get(&self, id: &str) -> Result<Option<Request>, RequestError>;

    /// Open (not failed) requests for a catalog id, oldest first.
    fn open_for_catalog(&self, catalog_id: &str) -> Result<Vec<Request>, RequestError>;

    /// Every open request, oldest first.
    fn open_requests(&self) -> Result<Vec<Request>, RequestError>;

    fn update_status(&self, id: &str, status: RequestStatus) -> Result<(), RequestError>;
}
