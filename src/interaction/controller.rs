use std::sync::{Arc, Mutex, MutexGuard};

use url::Url;

use crate::models::{Bounds, Geometry, GeometryPatch, OverlayKey, OverlayKind, Point};
use crate::store::OverlayStore;

use super::gestures::{hit_test, DragGesture, HitTarget, ResizeGesture};
use super::input::{InputCapture, InputRequest};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const TEXT_DEFAULT: Geometry = Geometry::new(20.0, 20.0, 140.0, 40.0);
pub const IMAGE_DEFAULT: Geometry = Geometry::new(40.0, 40.0, 120.0, 120.0);

const TEXT_PROMPT: &str = "Enter text";
const TEXT_INITIAL: &str = "LIVE";
const IMAGE_PROMPT: &str = "Enter image/logo URL";

/// Whether a pointer event should keep travelling to what lies underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Drag(DragGesture),
    Resize(ResizeGesture),
}

#[derive(Debug, Clone, Copy)]
struct ActiveGesture {
    key: OverlayKey,
    gesture: Gesture,
    preview: Geometry,
}

impl ActiveGesture {
    fn preview_at(&self, pointer: Point, bounds: Bounds) -> Geometry {
        match &self.gesture {
            Gesture::Drag(drag) => drag.preview(pointer, bounds),
            Gesture::Resize(resize) => resize.preview(pointer, bounds),
        }
    }
}

struct ControllerState {
    bounds: Bounds,
    active: Option<ActiveGesture>,
}

/// Turns pointer input into overlay mutations.
///
/// Gestures only preview geometry while the pointer moves; the store sees a
/// single update when the pointer is released.
pub struct InteractionController {
    store: OverlayStore,
    input: Arc<dyn InputCapture>,
    state: Mutex<ControllerState>,
}

impl InteractionController {
    pub fn new(store: OverlayStore, input: Arc<dyn InputCapture>, bounds: Bounds) -> Self {
        Self {
            store,
            input,
            state: Mutex::new(ControllerState {
                bounds,
                active: None,
            }),
        }
    }

    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    /// Asks for a caption and adds a text overlay at the default spot.
    pub async fn add_text_overlay(&self) -> Option<OverlayKey> {
        let request = InputRequest::new(TEXT_PROMPT).with_initial(TEXT_INITIAL);
        let Some(content) = self.input.request(request).await.into_value() else {
            log_debug!("Text overlay creation cancelled");
            return None;
        };
        Some(self.store.create(OverlayKind::Text, content, TEXT_DEFAULT))
    }

    /// Asks for an image locator and adds an image overlay at the default spot.
    pub async fn add_image_overlay(&self) -> Option<OverlayKey> {
        let Some(locator) = self.input.request(InputRequest::new(IMAGE_PROMPT)).await.into_value() else {
            log_debug!("Image overlay creation cancelled");
            return None;
        };
        let locator = locator.trim();
        if !is_image_locator(locator) {
            log_warn!("Ignoring image overlay with unusable locator {locator:?}");
            return None;
        }
        Some(self.store.create(OverlayKind::Image, locator, IMAGE_DEFAULT))
    }

    pub fn set_container_bounds(&self, bounds: Bounds) {
        self.state().bounds = bounds;
    }

    pub fn container_bounds(&self) -> Bounds {
        self.state().bounds
    }

    /// Routes a press to the top-most overlay under `point`.
    ///
    /// A press on a delete control deletes right away and never starts a
    /// gesture.
    pub fn pointer_down(&self, point: Point) -> Propagation {
        let overlays = self.store.snapshot();
        let hit = overlays
            .iter()
            .rev()
            .find_map(|overlay| hit_test(&overlay.geometry, point).map(|target| (overlay, target)));

        let Some((overlay, target)) = hit else {
            return Propagation::Continue;
        };

        let gesture = match target {
            HitTarget::DeleteControl => return self.delete_clicked(overlay.key),
            HitTarget::Handle(handle) => Gesture::Resize(ResizeGesture::new(overlay.geometry, point, handle)),
            HitTarget::Body => Gesture::Drag(DragGesture::new(overlay.geometry, point)),
        };

        log_debug!("Starting {gesture:?} on overlay {}", overlay.key);
        self.state().active = Some(ActiveGesture {
            key: overlay.key,
            gesture,
            preview: overlay.geometry,
        });
        Propagation::Stop
    }

    /// Updates the preview of the gesture in progress, if any.
    pub fn pointer_move(&self, point: Point) -> Option<(OverlayKey, Geometry)> {
        let mut state = self.state();
        let bounds = state.bounds;
        let active = state.active.as_mut()?;
        active.preview = active.preview_at(point, bounds);
        Some((active.key, active.preview))
    }

    /// Finishes the gesture in progress and commits its result.
    ///
    /// Drags commit only the new position; resizes commit the whole box in one
    /// patch. Releasing without any change commits nothing.
    pub fn pointer_up(&self, point: Point) -> Option<OverlayKey> {
        let (active, geometry, origin) = {
            let mut state = self.state();
            let bounds = state.bounds;
            let active = state.active.take()?;
            let geometry = active.preview_at(point, bounds);
            let origin = self.store.get(active.key).map(|overlay| overlay.geometry);
            (active, geometry, origin)
        };

        if origin == Some(geometry) {
            return None;
        }

        let patch = match active.gesture {
            Gesture::Drag(_) => GeometryPatch::position(geometry.x, geometry.y),
            Gesture::Resize(_) => GeometryPatch::full(geometry),
        };
        self.store
            .update_geometry(active.key, patch)
            .then_some(active.key)
    }

    /// Drops the gesture in progress without committing; returns whether there was one.
    pub fn cancel_gesture(&self) -> bool {
        self.state().active.take().is_some()
    }

    pub fn preview(&self) -> Option<(OverlayKey, Geometry)> {
        self.state().active.map(|active| (active.key, active.preview))
    }

    /// Deletes the overlay whose delete control was pressed.
    pub fn delete_clicked(&self, key: OverlayKey) -> Propagation {
        {
            let mut state = self.state();
            if state.active.is_some_and(|active| active.key == key) {
                state.active = None;
            }
        }
        if self.store.delete(key).is_none() {
            log_debug!("Delete clicked for unknown overlay {key}");
        }
        Propagation::Stop
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Absolute URLs and inline `data:` images are accepted.
fn is_image_locator(locator: &str) -> bool {
    if locator.starts_with("data:") {
        return locator.contains(',');
    }
    Url::parse(locator).is_ok()
}
