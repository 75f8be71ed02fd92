//! Queue of pending access-time updates for the scratch record.
//!
//! Updates accumulate here and are applied in one read-modify-write by a
//! single scheduled flush. Draining an empty queue is a no-op.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use strand_core::StreamId;

use crate::model::ScratchData;

/// Streams touched at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchUpdate {
    pub stream_ids: Vec<StreamId>,
    pub at_ms: i64,
}

#[derive(Debug, Default)]
pub struct ScratchQueue {
    pending: Mutex<Vec<ScratchUpdate>>,
    /// Bumped on every push; the flush task waits for it to settle.
    pushes: AtomicU64,
    scheduled: AtomicBool,
}

impl ScratchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update. Returns true if no flush is scheduled yet and the
    /// caller should schedule one.
    pub fn push(&self, update: ScratchUpdate) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(update);
        self.pushes.fetch_add(1, Ordering::SeqCst);
        !self.scheduled.swap(true, Ordering::SeqCst)
    }

    pub fn take(&self) -> Vec<ScratchUpdate> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Put back updates whose flush failed, ahead of anything queued since.
    pub fn restore(&self, mut updates: Vec<ScratchUpdate>) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        updates.append(&mut pending);
        *pending = updates;
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Allow the next push to schedule a flush again.
    pub fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
    }
}

/// Apply updates in order; the last write per stream wins.
pub fn apply_updates(updates: &[ScratchUpdate], data: &mut ScratchData) {
    for update in updates {
        for stream_id in &update.stream_ids {
            data.last_accessed_at.insert(*stream_id, update.at_ms);
        }
    }
}
