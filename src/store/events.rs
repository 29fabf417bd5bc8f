use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::models::{Geometry, OverlayKey};

use super::sync_queue::SyncOp;

const EVENT_CAPACITY: usize = 256;

/// Notifications for whatever renders the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    OverlaysLoaded {
        count: usize,
    },
    LoadFailed {
        message: String,
    },
    OverlayAdded {
        key: OverlayKey,
    },
    OverlayChanged {
        key: OverlayKey,
        geometry: Geometry,
    },
    OverlayRemoved {
        key: OverlayKey,
    },
    OverlayPersisted {
        key: OverlayKey,
        id: String,
    },
    /// A persistence call gave up; the local state was kept as is.
    PersistFailed {
        key: OverlayKey,
        operation: SyncOp,
        message: String,
        at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CanvasEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CanvasEvent> {
        self.sender.subscribe()
    }

    /// Publishes to current subscribers; having none is fine.
    pub fn emit(&self, event: CanvasEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
