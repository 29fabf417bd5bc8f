pub mod geometry;
pub mod overlay;

pub use geometry::{clamp_to_bounds, Bounds, Geometry, GeometryPatch, Point, MIN_OVERLAY_SIZE};
pub use overlay::{NewOverlay, Overlay, OverlayKey, OverlayKind, OverlayUpdate};
