//! Pipeline events handed to the notification collaborator.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notable pipeline outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A release was submitted to a download client.
    Grabbed {
        target_id: String,
        slot_id: String,
        grab_id: String,
        release_title: String,
    },
    /// A file was added to an empty slot.
    Imported {
        target_id: String,
        slot_id: String,
        path: String,
    },
    /// A file replaced a lower-quality one.
    Upgraded {
        target_id: String,
        slot_id: String,
        path: String,
        replaced_path: String,
    },
    ImportRejected {
        target_id: String,
        slot_id: String,
        decision: String,
        reason: String,
    },
    DownloadFailed {
        target_id: String,
        slot_id: String,
        reason: String,
    },
    RequestStatusChanged {
        request_id: String,
        from: String,
        to: String,
    },
}

/// Where pipeline events go. Publishing never blocks or fails the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: PipelineEvent);
}

/// Event sink backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<PipelineEvent>,
}

impl BroadcastEventSink {
    /// Create a new sink with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: PipelineEvent) {
        // A send error only means nobody is subscribed
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(PipelineEvent::RequestStatusChanged {
            request_id: "r1".into(),
            from: "approved".into(),
            to: "available".into(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PipelineEvent::RequestStatusChanged { ref to, .. } if to == "available"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastEventSink::new(8);
        sink.publish(PipelineEvent::DownloadFailed {
            target_id: "m1".into(),
            slot_id: "hd".into(),
            reason: "error".into(),
        });
    }
}
