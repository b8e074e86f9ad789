//! Forest change notifications.

use tokio::sync::broadcast;
use tracing::debug;

use crate::barrier::PassReport;
use thicket_common::types::NodeId;

#[derive(Debug, Clone)]
pub enum ForestEvent {
    /// A merge and verify pass committed changes.
    Reorganized(PassReport),
    /// A subtree was deleted.
    BranchPruned { root: NodeId, removed: usize, width: u64 },
}

/// Fan-out of [`ForestEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ForestEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForestEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ForestEvent) {
        if let Err(e) = self.sender.send(event) {
            debug!("No subscribers to receive event: {:?}", e.0);
        }
    }

    pub fn active_subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
