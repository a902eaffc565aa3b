//! Fan-out of document events to N-1 subscribers with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! connection holds an independent receiver buffering up to `capacity`
//! frames; a receiver that falls behind drops its oldest frames rather
//! than ever stalling the publisher.
//!
//! Frames are pre-encoded once and shared as `Arc<Vec<u8>>`, so fanning
//! out to a hundred subscribers costs a hundred pointer clones, not a
//! hundred serializations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{CollabMessage, ProtocolError};

/// Snapshot of a group's publish counters.
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub frames_published: u64,
    pub frames_lagged: u64,
    pub subscribers: usize,
}

/// Shared broadcast channel for one document's subscribers.
///
/// Publishing never blocks and never waits on a slow subscriber; the
/// channel's ring buffer absorbs bursts and lagged receivers observe
/// `RecvError::Lagged` instead of stalling everyone else.
pub struct FanoutGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
    frames_published: AtomicU64,
    frames_lagged: AtomicU64,
}

impl FanoutGroup {
    /// `capacity` is the per-subscriber frame buffer; beyond it, the
    /// slowest subscribers start losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_published: AtomicU64::new(0),
            frames_lagged: AtomicU64::new(0),
        }
    }

    /// New independent receiver for one connection.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Encode and publish a message; returns the subscriber count that
    /// observed it. Zero subscribers is not an error.
    pub fn publish(&self, msg: &CollabMessage) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(msg.encode()?);
        Ok(self.publish_raw(encoded))
    }

    /// Publish pre-encoded bytes. Lock-free hot path.
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Called by a connection that observed `RecvError::Lagged`.
    pub fn note_lag(&self, missed: u64) {
        self.frames_lagged.fetch_add(missed, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_lagged: self.frames_lagged.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

/// Maps document IDs to fan-out groups so frames stay isolated between
/// documents.
pub struct FanoutRegistry {
    groups: RwLock<HashMap<Uuid, Arc<FanoutGroup>>>,
    default_capacity: usize,
}

impl FanoutRegistry {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for a document.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<FanoutGroup> {
        // Fast path: read lock
        {
            let groups = self.groups.read().await;
            if let Some(group) = groups.get(&doc_id) {
                return group.clone();
            }
        }

        // Slow path: write lock, re-check after acquiring
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get(&doc_id) {
            return group.clone();
        }
        let group = Arc::new(FanoutGroup::new(self.default_capacity));
        groups.insert(doc_id, group.clone());
        group
    }

    /// Group for a document, if one is open. Never creates.
    pub async fn get(&self, doc_id: &Uuid) -> Option<Arc<FanoutGroup>> {
        self.groups.read().await.get(doc_id).cloned()
    }

    /// Drop a group once its last subscriber is gone.
    pub async fn remove_if_idle(&self, doc_id: &Uuid) -> bool {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get(doc_id) {
            if group.subscriber_count() == 0 {
                groups.remove(doc_id);
                return true;
            }
        }
        false
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.groups.read().await.keys().cloned().collect()
    }
}
