//! Per-overlay single-flight bookkeeping for persistence calls.
//!
//! Each overlay has at most one drain task talking to the backend. Operations
//! arriving while it is busy wait in a one-slot pending cell and coalesce, so the
//! backend always ends with the latest local state and never sees writes for one
//! overlay out of order.

use std::collections::HashMap;

use crate::models::{NewOverlay, OverlayKey, OverlayUpdate};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operation {
    Create(NewOverlay),
    Update(OverlayUpdate),
    Delete,
}

impl Operation {
    pub(crate) fn kind(&self) -> SyncOp {
        match self {
            Operation::Create(_) => SyncOp::Create,
            Operation::Update(_) => SyncOp::Update,
            Operation::Delete => SyncOp::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

impl SyncOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOp::Create => "create",
            SyncOp::Update => "update",
            SyncOp::Delete => "delete",
        }
    }
}

/// Work handed to a drain task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Job {
    pub op: Operation,
    /// Backend id known when the job was taken; `None` until a create succeeds.
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// Caller must spawn a drain task for this overlay.
    Spawn,
    /// A drain task is already running and will pick the operation up.
    Queued,
    /// Nothing needs to reach the backend.
    Dropped,
}

#[derive(Debug, Default)]
struct Slot {
    remote_id: Option<String>,
    draining: bool,
    pending: Option<Operation>,
    create_failed: bool,
    /// Deleted locally; later operations are ignored and the slot goes away once drained.
    removed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SyncQueue {
    slots: HashMap<OverlayKey, Slot>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an overlay that already exists on the backend.
    pub fn register(&mut self, key: OverlayKey, id: String) {
        self.slots.entry(key).or_default().remote_id = Some(id);
    }

    /// Forgets every overlay without a running drain task.
    pub fn clear_idle(&mut self) {
        self.slots.retain(|_, slot| slot.draining || slot.pending.is_some());
    }

    pub fn has_pending(&self, key: OverlayKey) -> bool {
        self.slots
            .get(&key)
            .map(|slot| slot.pending.is_some())
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.slots.values().all(|slot| !slot.draining)
    }

    pub fn enqueue(&mut self, key: OverlayKey, op: Operation) -> Enqueued {
        let slot = self.slots.entry(key).or_default();
        if slot.removed {
            return Enqueued::Dropped;
        }

        let reachable = slot.remote_id.is_some() || slot.draining || slot.pending.is_some();
        let accepted = match (slot.pending.take(), op) {
            (None, Operation::Create(payload)) => {
                slot.pending = Some(Operation::Create(payload));
                true
            }
            (Some(Operation::Create(mut payload)), Operation::Update(update)) => {
                payload.geometry = update.geometry;
                payload.content = update.content;
                slot.pending = Some(Operation::Create(payload));
                true
            }
            (Some(Operation::Create(_)), Operation::Delete) => {
                // Never sent, so there is nothing to undo on the backend.
                slot.removed = true;
                false
            }
            (pending @ Some(Operation::Delete), _) => {
                slot.pending = pending;
                false
            }
            (pending, Operation::Update(update)) => {
                if reachable && !slot.create_failed {
                    slot.pending = Some(Operation::Update(update));
                    true
                } else {
                    slot.pending = pending;
                    false
                }
            }
            (_, Operation::Delete) => {
                slot.removed = true;
                if reachable && !slot.create_failed {
                    slot.pending = Some(Operation::Delete);
                    true
                } else {
                    false
                }
            }
            (pending, Operation::Create(_)) => {
                // Keys are minted per create; a second create for one key is a caller bug.
                slot.pending = pending;
                false
            }
        };

        if !accepted {
            let empty = slot.remote_id.is_none() && slot.pending.is_none();
            if !slot.draining && (slot.removed || empty) {
                self.slots.remove(&key);
            }
            return Enqueued::Dropped;
        }

        if slot.draining {
            Enqueued::Queued
        } else {
            slot.draining = true;
            Enqueued::Spawn
        }
    }

    /// Takes the next operation for `key`, or marks its drain task finished.
    pub fn next_job(&mut self, key: OverlayKey) -> Option<Job> {
        let slot = self.slots.get_mut(&key)?;
        match slot.pending.take() {
            Some(op) => Some(Job {
                op,
                remote_id: slot.remote_id.clone(),
            }),
            None => {
                slot.draining = false;
                if slot.removed {
                    self.slots.remove(&key);
                }
                None
            }
        }
    }

    pub fn create_succeeded(&mut self, key: OverlayKey, id: String) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.remote_id = Some(id);
        }
    }

    pub fn create_failed(&mut self, key: OverlayKey) {
        if let Some(slot) = self.slots.get_mut(&key) {
            slot.create_failed = true;
        }
    }

    #[cfg(test)]
    fn contains(&self, key: OverlayKey) -> bool {
        self.slots.contains_key(&key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
