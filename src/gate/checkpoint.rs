//! Bounded in-memory checkpoint history.
//!
//! Snapshots of the adaptive model, oldest first. Each push tags the snapshot
//! with the next checkpoint index; when the history is full the oldest
//! snapshot is evicted.

use std::collections::VecDeque;

use super::model::ModelState;

/// FIFO store of adaptive-model snapshots used for rollback.
#[derive(Debug, Clone)]
pub struct CheckpointHistory {
    snapshots: VecDeque<ModelState>,
    capacity: usize,
    next_index: u64,
    last_capture_ms: u64,
}

impl CheckpointHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            next_index: 0,
            last_capture_ms: 0,
        }
    }

    /// Store a copy of `state` and return the index it was tagged with.
    pub fn push(&mut self, state: &ModelState, now_ms: u64) -> u64 {
        let index = self.next_index;
        self.next_index += 1;

        let mut snapshot = state.clone();
        snapshot.checkpoint_index = index;
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        self.last_capture_ms = now_ms;
        index
    }

    /// Newest snapshot, if any.
    pub fn latest(&self) -> Option<&ModelState> {
        self.snapshots.back()
    }

    /// True when at least `interval_ms` has passed since the last capture.
    pub fn is_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_capture_ms) >= interval_ms
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copies of every retained snapshot, oldest first.
    pub fn snapshots(&self) -> Vec<ModelState> {
        self.snapshots.iter().cloned().collect()
    }
}
