use std::sync::Arc;

use tokio::sync::mpsc;

use super::{HistoryEnvelope, HistoryHandle, HistoryRecord, HistoryStore};

/// Background task that receives history events and writes them to storage
pub struct HistoryWriter {
    rx: mpsc::Receiver<HistoryEnvelope>,
    store: Arc<dyn HistoryStore>,
}

impl HistoryWriter {
    pub fn new(rx: mpsc::Receiver<HistoryEnvelope>, store: Arc<dyn HistoryStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!("History writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = HistoryRecord {
                id: 0, // assigned by the store
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                media_id: envelope.event.media_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write history event: {}", e);
            }
        }

        tracing::info!("History writer shutting down");
    }
}

/// Create a complete history system
///
/// Returns the handle to clone into components and the writer to spawn
/// with `tokio::spawn(writer.run())`.
pub fn create_history_system(
    store: Arc<dyn HistoryStore>,
    buffer_size: usize,
) -> (HistoryHandle, HistoryWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (HistoryHandle::new(tx), HistoryWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryEvent, HistoryFilter, SqliteHistoryStore};

    #[tokio::test]
    async fn test_writer_stores_events_in_order() {
        let store = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let (handle, writer) = create_history_system(store.clone(), 16);
        let writer_task = tokio::spawn(writer.run());

        handle.append(HistoryEvent::ServiceStarted {
            version: "0.1.0".into(),
            config_hash: "abc".into(),
        });
        handle.append(HistoryEvent::ServiceStopped {
            reason: "graceful_shutdown".into(),
        });
        drop(handle);

        writer_task.await.unwrap();

        let records = store.query(&HistoryFilter::new()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, "service_started");
        assert_eq!(records[1].event_type, "service_stopped");
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles() {
        let store = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let (handle, writer) = create_history_system(store.clone(), 16);
        let other = handle.clone();
        let writer_task = tokio::spawn(writer.run());

        drop(handle);
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        assert!(!writer_task.is_finished());

        other.append(HistoryEvent::ServiceStopped {
            reason: "late".into(),
        });
        drop(other);

        tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.count(&HistoryFilter::new()).unwrap(), 1);
    }
}
