use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::HistoryEvent;

/// Envelope wrapping a history event with metadata
#[derive(Debug, Clone)]
pub struct HistoryEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: HistoryEvent,
}

/// Handle for appending history events
///
/// Cheaply cloneable. Appends never block and never fail the caller:
/// events go through a channel to the [`HistoryWriter`](super::HistoryWriter).
#[derive(Clone)]
pub struct HistoryHandle {
    tx: mpsc::Sender<HistoryEnvelope>,
}

impl HistoryHandle {
    pub fn new(tx: mpsc::Sender<HistoryEnvelope>) -> Self {
        Self { tx }
    }

    /// Append an event without blocking.
    ///
    /// When the buffer is full the send is handed to a spawned task so the
    /// event is still written once the writer catches up. A closed channel
    /// is logged and the event dropped.
    pub fn append(&self, event: HistoryEvent) {
        let envelope = HistoryEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    let tx = self.tx.clone();
                    rt.spawn(async move {
                        if let Err(e) = tx.send(envelope).await {
                            tracing::error!("Failed to append history event: {}", e);
                        }
                    });
                }
                Err(_) => {
                    tracing::error!(
                        event_type = envelope.event.event_type(),
                        "History buffer full outside a runtime, dropping event"
                    );
                }
            },
            Err(TrySendError::Closed(envelope)) => {
                tracing::error!(
                    event_type = envelope.event.event_type(),
                    "History writer closed, dropping event"
                );
            }
        }
    }
}
