//! Mock release source for testing.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::searcher::{RawRelease, SearchError, SearchQuery, SourceKind, SourceSearch};

/// Mock implementation of the SourceSearch trait.
///
/// Provides controllable behavior for testing:
/// - Return configured releases for every query
/// - Record queries for assertions
/// - Simulate failures and slow responses
///
/// # Example
///
/// ```rust,ignore
/// let source = MockSource::new("idx", SourceKind::Direct);
/// source.add_release(fixtures::raw_release("Some.Movie.2021.1080p.WEB-DL", "idx", 4_000));
/// source.set_delay(Duration::from_secs(5)); // exceeds the router timeout
/// ```
pub struct MockSource {
    name: String,
    kind: SourceKind,
    releases: Mutex<Vec<RawRelease>>,
    error: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl MockSource {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            releases: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            delay: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn add_release(&self, release: RawRelease) {
        lock(&self.releases).push(release);
    }

    /// Fail every search with a connection error.
    pub fn set_error(&self, message: impl Into<String>) {
        *lock(&self.error) = Some(message.into());
    }

    pub fn clear_error(&self) {
        *lock(&self.error) = None;
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn search_count(&self) -> usize {
        lock(&self.queries).len()
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SourceSearch for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawRelease>, SearchError> {
        lock(&self.queries).push(query.clone());

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let error = lock(&self.error).clone();
        if let Some(message) = error {
            return Err(SearchError::ConnectionFailed(message));
        }
        Ok(lock(&self.releases).clone())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
