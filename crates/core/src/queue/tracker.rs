//! Background polling of download client queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::download_client::{ClientRegistry, QueueItem, QueueStatus};
use crate::metrics;
use crate::shared::Shared;

use super::{QueueError, QueueSnapshot, UnreachableClient};

/// Mirrors every download client's queue and broadcasts a snapshot per poll.
pub struct QueueTracker {
    clients: ClientRegistry,
    config: Shared<Config>,
    snapshots: broadcast::Sender<Arc<QueueSnapshot>>,
    latest: RwLock<Option<Arc<QueueSnapshot>>>,
    trigger: Notify,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueTracker {
    pub fn new(clients: ClientRegistry, config: Shared<Config>) -> Self {
        let (snapshots, _) = broadcast::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            clients,
            config,
            snapshots,
            latest: RwLock::new(None),
            trigger: Notify::new(),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<QueueSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Snapshot from the most recent poll.
    pub fn latest(&self) -> Option<Arc<QueueSnapshot>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask for a poll as soon as the minimum interval allows.
    ///
    /// Requests made before the next poll starts collapse into that poll.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Poll every client once, publish and return the snapshot.
    pub async fn poll_once(&self) -> Arc<QueueSnapshot> {
        let timeout = Duration::from_millis(self.config.current().queue.client_timeout_ms);

        let polls = self.clients.all().iter().map(|client| async move {
            let result = tokio::time::timeout(timeout, client.queue()).await;
            (client.name().to_string(), result)
        });

        let mut items: Vec<QueueItem> = Vec::new();
        let mut unreachable = Vec::new();

        for (name, result) in join_all(polls).await {
            match result {
                Ok(Ok(mut client_items)) => {
                    metrics::QUEUE_POLLS.with_label_values(&[name.as_str(), "ok"]).inc();
                    record_item_gauges(&name, &client_items);
                    items.append(&mut client_items);
                }
                Ok(Err(e)) => {
                    metrics::QUEUE_POLLS.with_label_values(&[name.as_str(), "error"]).inc();
                    warn!(client = %name, error = %e, "Download client poll failed");
                    unreachable.push(UnreachableClient {
                        client: name,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    metrics::QUEUE_POLLS.with_label_values(&[name.as_str(), "timeout"]).inc();
                    warn!(
                        client = %name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Download client poll timed out"
                    );
                    unreachable.push(UnreachableClient {
                        client: name,
                        error: format!("timed out after {}ms", timeout.as_millis()),
                    });
                }
            }
        }

        let snapshot = Arc::new(QueueSnapshot {
            taken_at: Utc::now(),
            items,
            unreachable,
        });

        debug!(
            items = snapshot.items.len(),
            unreachable = snapshot.unreachable.len(),
            "Queue polled"
        );

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        // No subscribers is fine
        let _ = self.snapshots.send(Arc::clone(&snapshot));
        snapshot
    }

    pub async fn pause(&self, client: &str, job_id: &str) -> Result<(), QueueError> {
        self.client(client)?.pause(job_id).await?;
        info!(client, job_id, "Download paused");
        self.trigger_now();
        Ok(())
    }

    pub async fn resume(&self, client: &str, job_id: &str) -> Result<(), QueueError> {
        self.client(client)?.resume(job_id).await?;
        info!(client, job_id, "Download resumed");
        self.trigger_now();
        Ok(())
    }

    pub async fn remove(&self, client: &str, job_id: &str, delete_files: bool) -> Result<(), QueueError> {
        self.client(client)?.remove(job_id, delete_files).await?;
        info!(client, job_id, delete_files, "Download removed");
        self.trigger_now();
        Ok(())
    }

    fn client(&self, name: &str) -> Result<Arc<dyn crate::download_client::DownloadClient>, QueueError> {
        self.clients
            .get(name)
            .ok_or_else(|| QueueError::UnknownClient(name.to_string()))
    }

    /// Start the polling loop. Polls immediately, then every
    /// `queue.poll_interval_ms` or on trigger, never closer together than
    /// `queue.min_interval_ms`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Queue tracker already running");
            return None;
        }

        let tracker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            info!("Queue tracker started");
            let mut last_poll: Option<Instant> = None;

            loop {
                if let Some(last) = last_poll {
                    let queue = tracker.config.current().queue.clone();
                    let poll_interval = Duration::from_millis(queue.poll_interval_ms);
                    let min_interval = Duration::from_millis(queue.min_interval_ms);

                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = tracker.trigger.notified() => {}
                    }

                    let earliest = last + min_interval;
                    if Instant::now() < earliest {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep_until(earliest) => {}
                        }
                    }
                }

                if !tracker.running.load(Ordering::SeqCst) {
                    break;
                }
                // Triggers so far are served by this poll
                let _ = tracker.trigger.notified().now_or_never();
                tracker.poll_once().await;
                last_poll = Some(Instant::now());
            }

            info!("Queue tracker stopped");
        }))
    }

    /// Signal the polling loop to exit.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}

fn record_item_gauges(client: &str, items: &[QueueItem]) {
    for status in QueueStatus::all() {
        let count = items.iter().filter(|i| i.status == status).count();
        metrics::QUEUE_ITEMS
            .with_label_values(&[client, status.as_str()])
            .set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockDownloadClient};

    fn config(poll_interval_ms: u64, min_interval_ms: u64, client_timeout_ms: u64) -> Shared<Config> {
        let mut config = Config::default();
        config.queue.poll_interval_ms = poll_interval_ms;
        config.queue.min_interval_ms = min_interval_ms;
        config.queue.client_timeout_ms = client_timeout_ms;
        Shared::new(config)
    }

    #[tokio::test]
    async fn test_poll_once_merges_clients_and_lists_unreachable() {
        let good = Arc::new(MockDownloadClient::new("good"));
        let broken = Arc::new(MockDownloadClient::new("broken"));
        let slow = Arc::new(MockDownloadClient::new("slow"));
        good.add_queue_item(fixtures::queue_item("good", "aaa", QueueStatus::Downloading));
        good.add_queue_item(fixtures::queue_item("good", "bbb", QueueStatus::Completed));
        broken.set_queue_error("connection refused");
        slow.add_queue_item(fixtures::queue_item("slow", "ccc", QueueStatus::Queued));
        slow.set_queue_delay(Duration::from_secs(5));

        let tracker = QueueTracker::new(
            ClientRegistry::new(vec![good, broken, slow]),
            config(5_000, 0, 100),
        );
        let mut rx = tracker.subscribe();

        let snapshot = tracker.poll_once().await;
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.completed().count(), 1);
        assert!(snapshot.is_reachable("good"));
        assert!(!snapshot.is_reachable("broken"));
        assert!(!snapshot.is_reachable("slow"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.items.len(), 2);
        assert_eq!(tracker.latest().unwrap().items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_collapse_and_respect_min_interval() {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let tracker = Arc::new(QueueTracker::new(
            ClientRegistry::new(vec![client.clone()]),
            config(3_600_000, 1_000, 1_000),
        ));

        let handle = tracker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.queue_calls(), 1);

        for _ in 0..5 {
            tracker.trigger_now();
        }

        // Held back by the minimum interval
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.queue_calls(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.queue_calls(), 2);

        tracker.stop();
        handle.await.unwrap();
        assert!(!tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_min_interval_wait_adds_no_poll() {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let tracker = Arc::new(QueueTracker::new(
            ClientRegistry::new(vec![client.clone()]),
            config(3_600_000, 1_000, 1_000),
        ));

        let handle = tracker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.queue_calls(), 1);

        tracker.trigger_now();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The loop is now waiting out the minimum interval
        tracker.trigger_now();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.queue_calls(), 2);

        // A trigger after that poll still gets its own
        tracker.trigger_now();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.queue_calls(), 3);

        tracker.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_polling() {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let tracker = Arc::new(QueueTracker::new(
            ClientRegistry::new(vec![client.clone()]),
            config(1_000, 100, 1_000),
        ));

        let handle = tracker.start().unwrap();
        assert!(tracker.start().is_none());
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(client.queue_calls(), 4);

        tracker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_job_actions_proxy_and_trigger() {
        let client = Arc::new(MockDownloadClient::new("qbit"));
        let tracker = QueueTracker::new(
            ClientRegistry::new(vec![client.clone()]),
            config(5_000, 0, 1_000),
        );

        tracker.pause("qbit", "aaa").await.unwrap();
        tracker.resume("qbit", "aaa").await.unwrap();
        tracker.remove("qbit", "aaa", true).await.unwrap();
        assert_eq!(
            client.actions(),
            vec!["pause:aaa", "resume:aaa", "remove:aaa:true"]
        );

        let err = tracker.pause("nope", "aaa").await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownClient(_)));
    }
}
