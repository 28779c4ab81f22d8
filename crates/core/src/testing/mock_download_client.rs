//! Mock download client for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::download_client::{DownloadClient, DownloadClientError, QueueItem, QueueStatus};
use crate::searcher::CandidateRelease;

use super::mock_source::lock;

/// Mock implementation of the DownloadClient trait.
///
/// Submitted releases become queued jobs in the mock's queue; tests then
/// drive them with [`MockDownloadClient::complete`] or
/// [`MockDownloadClient::fail`].
///
/// # Example
///
/// ```rust,ignore
/// let client = MockDownloadClient::new("qbit");
/// let job_id = client.submit(&candidate).await?;
/// client.complete(&job_id, download_dir);
/// assert_eq!(client.queue().await?[0].status, QueueStatus::Completed);
/// ```
pub struct MockDownloadClient {
    name: String,
    submitted: Mutex<Vec<CandidateRelease>>,
    submit_delay: Mutex<Option<Duration>>,
    next_error: Mutex<Option<String>>,
    queue: Mutex<Vec<QueueItem>>,
    queue_error: Mutex<Option<String>>,
    queue_delay: Mutex<Option<Duration>>,
    queue_calls: AtomicUsize,
    actions: Mutex<Vec<String>>,
    job_counter: AtomicUsize,
}

impl MockDownloadClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            submitted: Mutex::new(Vec::new()),
            submit_delay: Mutex::new(None),
            next_error: Mutex::new(None),
            queue: Mutex::new(Vec::new()),
            queue_error: Mutex::new(None),
            queue_delay: Mutex::new(None),
            queue_calls: AtomicUsize::new(0),
            actions: Mutex::new(Vec::new()),
            job_counter: AtomicUsize::new(0),
        }
    }

    /// Releases accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<CandidateRelease> {
        lock(&self.submitted).clone()
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *lock(&self.submit_delay) = Some(delay);
    }

    /// Fail the next submission with a connection error.
    pub fn set_next_error(&self, message: impl Into<String>) {
        *lock(&self.next_error) = Some(message.into());
    }

    pub fn add_queue_item(&self, item: QueueItem) {
        lock(&self.queue).push(item);
    }

    pub fn set_queue_error(&self, message: impl Into<String>) {
        *lock(&self.queue_error) = Some(message.into());
    }

    pub fn clear_queue_error(&self) {
        *lock(&self.queue_error) = None;
    }

    pub fn set_queue_delay(&self, delay: Duration) {
        *lock(&self.queue_delay) = Some(delay);
    }

    pub fn queue_calls(&self) -> usize {
        self.queue_calls.load(Ordering::SeqCst)
    }

    /// Job actions as `pause:<job>`, `resume:<job>` and
    /// `remove:<job>:<delete_files>`.
    pub fn actions(&self) -> Vec<String> {
        lock(&self.actions).clone()
    }

    /// Mark a job finished with its payload at `content_path`.
    pub fn complete(&self, job_id: &str, content_path: impl Into<PathBuf>) {
        let content_path = content_path.into();
        self.update(job_id, |item| {
            item.status = QueueStatus::Completed;
            item.progress = 1.0;
            item.downloaded_bytes = item.size_bytes;
            item.download_speed = 0;
            item.eta_secs = None;
            item.save_path = content_path.parent().map(|p| p.to_path_buf());
            item.content_path = Some(content_path);
        });
    }

    /// Put a job into the error state.
    pub fn fail(&self, job_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(job_id, |item| {
            item.status = QueueStatus::Error;
            item.error = Some(error);
        });
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut QueueItem)) {
        if let Some(item) = lock(&self.queue).iter_mut().find(|i| i.job_id == job_id) {
            f(item);
        }
    }

    fn next_job_id(&self, release: &CandidateRelease) -> String {
        match &release.info_hash {
            Some(hash) => hash.clone(),
            None => format!(
                "{}-job-{}",
                self.name,
                self.job_counter.fetch_add(1, Ordering::SeqCst) + 1
            ),
        }
    }
}

#[async_trait]
impl DownloadClient for MockDownloadClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, release: &CandidateRelease) -> Result<String, DownloadClientError> {
        let delay = *lock(&self.submit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let error = lock(&self.next_error).take();
        if let Some(message) = error {
            return Err(DownloadClientError::ConnectionFailed(message));
        }

        let job_id = self.next_job_id(release);
        lock(&self.submitted).push(release.clone());
        lock(&self.queue).push(QueueItem {
            client: self.name.clone(),
            job_id: job_id.clone(),
            name: release.title.clone(),
            status: QueueStatus::Queued,
            progress: 0.0,
            size_bytes: release.size_bytes,
            downloaded_bytes: 0,
            download_speed: 0,
            eta_secs: None,
            save_path: None,
            content_path: None,
            error: None,
        });
        Ok(job_id)
    }

    async fn queue(&self) -> Result<Vec<QueueItem>, DownloadClientError> {
        self.queue_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.queue_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let error = lock(&self.queue_error).clone();
        if let Some(message) = error {
            return Err(DownloadClientError::ConnectionFailed(message));
        }
        Ok(lock(&self.queue).clone())
    }

    async fn pause(&self, job_id: &str) -> Result<(), DownloadClientError> {
        lock(&self.actions).push(format!("pause:{}", job_id));
        self.update(job_id, |item| item.status = QueueStatus::Paused);
        Ok(())
    }

    async fn resume(&self, job_id: &str) -> Result<(), DownloadClientError> {
        lock(&self.actions).push(format!("resume:{}", job_id));
        self.update(job_id, |item| item.status = QueueStatus::Downloading);
        Ok(())
    }

    async fn remove(&self, job_id: &str, delete_files: bool) -> Result<(), DownloadClientError> {
        lock(&self.actions).push(format!("remove:{}:{}", job_id, delete_files));
        lock(&self.queue).retain(|i| i.job_id != job_id);
        Ok(())
    }
}
