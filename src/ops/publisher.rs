//! Snapshot publishing.
//!
//! Fire-and-forget: a slow or absent consumer must never stall or fail
//! the readout loop, so publishing has no error path at all.

use crate::io::Snapshot;
use tokio::sync::broadcast;

/// Sink for completed readout snapshots.
pub trait Publisher: Send + Sync {
    fn publish(&self, snapshot: &Snapshot);
}

/// Publisher that drops everything. Used when no consumer is configured.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _snapshot: &Snapshot) {}
}

/// Publisher over a tokio broadcast channel. Send failures mean nobody
/// is subscribed right now, which is fine.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Snapshot>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, snapshot: &Snapshot) {
        let _ = self.tx.send(snapshot.clone());
    }
}
