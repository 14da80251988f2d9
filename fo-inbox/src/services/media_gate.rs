//! Media concurrency gate
//!
//! Audio and image files are expensive to extract, so they get their own cap
//! on top of the general queue concurrency. An item arriving at a full gate
//! is buffered (FIFO) and its queue task returns early; when a media item
//! finishes, `release` hands back the next buffered item with its slot
//! already reserved, so the caller can put it back on the queue.

use crate::services::id_service::FileHash;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Gate occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    /// Running plus reserved slots
    pub active: usize,
    /// Buffered, waiting for a slot
    pub queued: usize,
}

/// Result of `try_acquire`
#[derive(Debug)]
pub enum Acquire<T> {
    /// Slot taken; the item is handed back to the caller
    Admitted(T),
    /// Gate full; the item is buffered until a slot frees up
    Deferred,
}

struct GateState<T> {
    active: HashSet<FileHash>,
    /// Slots handed over by `release` to an item on its way back
    reserved: HashSet<FileHash>,
    buffered: VecDeque<(FileHash, T)>,
}

impl<T> GateState<T> {
    fn occupied(&self) -> usize {
        self.active.len() + self.reserved.len()
    }
}

pub struct MediaGate<T> {
    limit: usize,
    state: Mutex<GateState<T>>,
}

impl<T> MediaGate<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(GateState {
                active: HashSet::new(),
                reserved: HashSet::new(),
                buffered: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a media slot for `hash`, or buffer `item` when the gate is full
    pub fn try_acquire(&self, hash: &FileHash, item: T) -> Acquire<T> {
        let mut state = self.state();

        let admitted = if state.reserved.remove(hash) || state.active.contains(hash) {
            true
        } else {
            state.occupied() < self.limit
        };

        if admitted {
            state.active.insert(hash.clone());
            debug!(hash = %hash, active = state.active.len(), "Media slot acquired");
            Acquire::Admitted(item)
        } else {
            state.buffered.retain(|(h, _)| h != hash);
            state.buffered.push_back((hash.clone(), item));
            debug!(hash = %hash, buffered = state.buffered.len(), "Media gate full, deferring");
            Acquire::Deferred
        }
    }

    /// Free the slot held by `hash`
    ///
    /// Returns the next buffered item, whose slot stays reserved until it
    /// calls `try_acquire` again.
    pub fn release(&self, hash: &FileHash) -> Option<T> {
        let mut state = self.state();
        state.active.remove(hash);

        if state.occupied() >= self.limit {
            return None;
        }
        let (next_hash, item) = state.buffered.pop_front()?;
        debug!(released = %hash, next = %next_hash, "Media slot handed over");
        state.reserved.insert(next_hash);
        Some(item)
    }

    /// Whether `hash` currently holds a slot
    pub fn is_active(&self, hash: &FileHash) -> bool {
        self.state().active.contains(hash)
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.active.clear();
        state.reserved.clear();
        state.buffered.clear();
    }

    pub fn stats(&self) -> MediaStats {
        let state = self.state();
        MediaStats {
            active: state.occupied(),
            queued: state.buffered.len(),
        }
    }

    /// Nothing running, reserved or buffered
    pub fn is_empty(&self) -> bool {
        let state = self.state();
        state.occupied() == 0 && state.buffered.is_empty()
    }
}
