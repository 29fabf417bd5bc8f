use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::gateway::{NotDelivered, OverlayGateway};
use crate::models::{Geometry, GeometryPatch, NewOverlay, Overlay, OverlayKey, OverlayKind, OverlayUpdate};
use crate::settings::RetryPolicy;

use super::events::{CanvasEvent, EventBus};
use super::retry::{with_retry, with_retry_if};
use super::sync_queue::{Enqueued, Job, Operation, SyncOp, SyncQueue};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

struct StoreInner {
    overlays: Mutex<Vec<Overlay>>,
    queue: Mutex<SyncQueue>,
    gateway: Arc<dyn OverlayGateway>,
    retry: RetryPolicy,
    events: EventBus,
    /// Number of drain tasks currently running.
    active_drains: watch::Sender<usize>,
}

/// Client-side source of truth for the overlay collection.
///
/// Mutations apply locally right away, in call order, and are then persisted in
/// the background through a per-overlay single-flight queue. Persistence
/// failures never roll the local state back; they surface as
/// [`CanvasEvent::PersistFailed`].
///
/// Mutating methods spawn tokio tasks and must be called inside a runtime.
#[derive(Clone)]
pub struct OverlayStore {
    inner: Arc<StoreInner>,
}

impl OverlayStore {
    pub fn new(gateway: Arc<dyn OverlayGateway>, retry: RetryPolicy) -> Self {
        let (active_drains, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(StoreInner {
                overlays: Mutex::new(Vec::new()),
                queue: Mutex::new(SyncQueue::new()),
                gateway,
                retry,
                events: EventBus::new(),
                active_drains,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CanvasEvent> {
        self.inner.events.subscribe()
    }

    /// Replaces the local collection with the backend's.
    ///
    /// On failure the collection is left empty and the error is returned; there
    /// is no automatic retry.
    pub async fn load(&self) -> Result<usize> {
        let fetched = self
            .inner
            .gateway
            .list()
            .await
            .context("failed to load overlays");

        let fetched = match fetched {
            Ok(overlays) => overlays,
            Err(err) => {
                self.overlays().clear();
                log_error!("{err:#}");
                self.inner.events.emit(CanvasEvent::LoadFailed {
                    message: format!("{err:#}"),
                });
                return Err(err);
            }
        };

        let mut seen = HashSet::new();
        let mut loaded = Vec::with_capacity(fetched.len());
        for overlay in fetched {
            let Some(id) = overlay.id.clone() else {
                log_warn!("Skipping overlay without id from backend");
                continue;
            };
            if !seen.insert(id.clone()) {
                log_warn!("Skipping duplicate overlay id {id} from backend");
                continue;
            }
            if !overlay.geometry.is_finite() {
                log_warn!("Skipping overlay {id} with non-finite geometry");
                continue;
            }
            loaded.push(overlay);
        }

        {
            let mut queue = self.queue();
            queue.clear_idle();
            for overlay in &loaded {
                if let Some(id) = &overlay.id {
                    queue.register(overlay.key, id.clone());
                }
            }
        }

        let count = loaded.len();
        *self.overlays() = loaded;
        log_info!("Loaded {count} overlays");
        self.inner.events.emit(CanvasEvent::OverlaysLoaded { count });
        Ok(count)
    }

    /// Adds a provisional overlay and persists it in the background.
    pub fn create(&self, kind: OverlayKind, content: impl Into<String>, geometry: Geometry) -> OverlayKey {
        let overlay = Overlay::provisional(kind, content, geometry);
        let key = overlay.key;
        let payload = NewOverlay::from(&overlay);

        self.overlays().push(overlay);
        log_debug!("Created provisional {} overlay {key}", kind.as_str());
        self.inner.events.emit(CanvasEvent::OverlayAdded { key });

        self.enqueue(key, Operation::Create(payload));
        key
    }

    /// Merges `patch` into the overlay `key`; returns `false` if there is no such overlay.
    pub fn update_geometry(&self, key: OverlayKey, patch: GeometryPatch) -> bool {
        if patch.is_empty() {
            return false;
        }

        let update = {
            let mut overlays = self.overlays();
            let Some(overlay) = overlays.iter_mut().find(|o| o.key == key) else {
                return false;
            };
            let merged = overlay.geometry.merged(&patch);
            if !merged.is_finite() {
                log_warn!("Rejected non-finite geometry for overlay {key}: {patch:?}");
                return false;
            }
            overlay.geometry = merged;
            OverlayUpdate::from(&*overlay)
        };

        log_debug!("Overlay {key} moved to {:?}", update.geometry);
        self.inner.events.emit(CanvasEvent::OverlayChanged {
            key,
            geometry: update.geometry,
        });

        self.enqueue(key, Operation::Update(update));
        true
    }

    /// Removes the overlay `key` locally and on the backend.
    pub fn delete(&self, key: OverlayKey) -> Option<Overlay> {
        let removed = {
            let mut overlays = self.overlays();
            let index = overlays.iter().position(|o| o.key == key)?;
            overlays.remove(index)
        };

        log_debug!("Deleted overlay {key}");
        self.inner.events.emit(CanvasEvent::OverlayRemoved { key });

        self.enqueue(key, Operation::Delete);
        Some(removed)
    }

    pub fn snapshot(&self) -> Vec<Overlay> {
        self.overlays().clone()
    }

    pub fn get(&self, key: OverlayKey) -> Option<Overlay> {
        self.overlays().iter().find(|o| o.key == key).cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Overlay> {
        self.overlays()
            .iter()
            .find(|o| o.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.overlays().len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays().is_empty()
    }

    /// Waits until every queued persistence call has settled.
    pub async fn flush(&self) {
        let mut active = self.inner.active_drains.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }

    fn enqueue(&self, key: OverlayKey, op: Operation) {
        let kind = op.kind();
        let outcome = self.queue().enqueue(key, op);
        match outcome {
            Enqueued::Spawn => self.spawn_drain(key),
            Enqueued::Queued => log_debug!("Queued {} for overlay {key}", kind.as_str()),
            Enqueued::Dropped => {
                log_debug!("Dropped {} for overlay {key}", kind.as_str());
                if kind == SyncOp::Update {
                    self.report_failure(key, kind, anyhow!("overlay was never persisted"));
                }
            }
        }
    }

    fn spawn_drain(&self, key: OverlayKey) {
        self.inner.active_drains.send_modify(|count| *count += 1);
        let store = self.clone();
        tokio::spawn(async move {
            store.drain(key).await;
            store
                .inner
                .active_drains
                .send_modify(|count| *count = count.saturating_sub(1));
        });
    }

    async fn drain(&self, key: OverlayKey) {
        loop {
            let job = self.queue().next_job(key);
            let Some(job) = job else {
                break;
            };
            self.run_job(key, job).await;
        }
    }

    async fn run_job(&self, key: OverlayKey, job: Job) {
        let gateway = self.inner.gateway.as_ref();
        let retry = &self.inner.retry;

        match job.op {
            Operation::Create(payload) => {
                let payload = &payload;
                // A create that may have reached the backend is not repeated.
                let result = with_retry_if(
                    retry,
                    "create overlay",
                    move || gateway.create(payload),
                    NotDelivered::is_cause_of,
                )
                .await
                .and_then(|created| match created.id.clone() {
                    Some(id) => Ok((id, created)),
                    None => Err(anyhow!("backend returned an overlay without id")),
                });

                match result {
                    Ok((id, created)) => {
                        self.queue().create_succeeded(key, id.clone());
                        self.reconcile_created(key, created);
                        log_debug!("Overlay {key} persisted as {id}");
                        self.inner
                            .events
                            .emit(CanvasEvent::OverlayPersisted { key, id });
                    }
                    Err(err) => {
                        self.queue().create_failed(key);
                        self.report_failure(key, SyncOp::Create, err);
                    }
                }
            }
            Operation::Update(update) => {
                let Some(id) = job.remote_id else {
                    self.report_failure(key, SyncOp::Update, anyhow!("overlay was never persisted"));
                    return;
                };
                let (id, update) = (id.as_str(), &update);
                if let Err(err) =
                    with_retry(retry, "update overlay", move || gateway.update(id, update)).await
                {
                    self.report_failure(key, SyncOp::Update, err);
                }
            }
            Operation::Delete => {
                // Without an id the overlay never reached the backend.
                let Some(id) = job.remote_id else {
                    return;
                };
                let id = id.as_str();
                if let Err(err) = with_retry(retry, "delete overlay", move || gateway.delete(id)).await {
                    self.report_failure(key, SyncOp::Delete, err);
                }
            }
        }
    }

    /// Adopts the backend's identity and normalized fields for a created overlay.
    ///
    /// Geometry is only taken over when no newer local change is queued, so a
    /// drag made while the create was in flight is not undone.
    fn reconcile_created(&self, key: OverlayKey, created: Overlay) {
        let newer_local_change = self.queue().has_pending(key);

        let mut overlays = self.overlays();
        let Some(overlay) = overlays.iter_mut().find(|o| o.key == key) else {
            return;
        };
        overlay.id = created.id;
        if !newer_local_change {
            overlay.content = created.content;
            if created.geometry.is_finite() {
                overlay.geometry = created.geometry;
            }
        }
    }

    fn report_failure(&self, key: OverlayKey, operation: SyncOp, err: anyhow::Error) {
        log_warn!("Persisting {} for overlay {key} failed: {err:#}", operation.as_str());
        self.inner.events.emit(CanvasEvent::PersistFailed {
            key,
            operation,
            message: format!("{err:#}"),
            at: Utc::now(),
        });
    }

    fn overlays(&self) -> MutexGuard<'_, Vec<Overlay>> {
        self.inner
            .overlays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, SyncQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
