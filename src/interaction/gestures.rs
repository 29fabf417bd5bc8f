//! Hit testing and drag/resize geometry for overlay boxes.

use crate::models::{clamp_to_bounds, Bounds, Geometry, Point};

/// Side of the square delete control.
pub const DELETE_CONTROL_SIZE: f64 = 22.0;
/// Distance of the delete control from the box's top and right edges.
pub const DELETE_CONTROL_INSET: f64 = 6.0;
/// Width of the grab zone centered on each edge.
pub const HANDLE_GRAB: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeHandle {
    Top,
    Right,
    Bottom,
    Left,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ResizeHandle {
    pub const ALL: [ResizeHandle; 8] = [
        ResizeHandle::Top,
        ResizeHandle::Right,
        ResizeHandle::Bottom,
        ResizeHandle::Left,
        ResizeHandle::TopLeft,
        ResizeHandle::TopRight,
        ResizeHandle::BottomLeft,
        ResizeHandle::BottomRight,
    ];

    fn moves_left(self) -> bool {
        matches!(self, ResizeHandle::Left | ResizeHandle::TopLeft | ResizeHandle::BottomLeft)
    }

    fn moves_right(self) -> bool {
        matches!(self, ResizeHandle::Right | ResizeHandle::TopRight | ResizeHandle::BottomRight)
    }

    fn moves_top(self) -> bool {
        matches!(self, ResizeHandle::Top | ResizeHandle::TopLeft | ResizeHandle::TopRight)
    }

    fn moves_bottom(self) -> bool {
        matches!(self, ResizeHandle::Bottom | ResizeHandle::BottomLeft | ResizeHandle::BottomRight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    DeleteControl,
    Handle(ResizeHandle),
    Body,
}

pub fn delete_control_rect(geometry: &Geometry) -> Geometry {
    Geometry::new(
        geometry.right() - DELETE_CONTROL_INSET - DELETE_CONTROL_SIZE,
        geometry.y + DELETE_CONTROL_INSET,
        DELETE_CONTROL_SIZE,
        DELETE_CONTROL_SIZE,
    )
}

/// What part of the box at `geometry` lies under `point`.
///
/// The delete control sits above the resize handles, which sit above the body.
pub fn hit_test(geometry: &Geometry, point: Point) -> Option<HitTarget> {
    if delete_control_rect(geometry).contains(point) {
        return Some(HitTarget::DeleteControl);
    }
    if let Some(handle) = handle_at(geometry, point) {
        return Some(HitTarget::Handle(handle));
    }
    geometry.contains(point).then_some(HitTarget::Body)
}

fn handle_at(geometry: &Geometry, point: Point) -> Option<ResizeHandle> {
    let half = HANDLE_GRAB / 2.0;
    let outside = point.x < geometry.x - half
        || point.x > geometry.right() + half
        || point.y < geometry.y - half
        || point.y > geometry.bottom() + half;
    if outside {
        return None;
    }

    // On boxes narrower than a grab zone both edges match; the far edge wins.
    let right = (point.x - geometry.right()).abs() <= half;
    let left = !right && (point.x - geometry.x).abs() <= half;
    let bottom = (point.y - geometry.bottom()).abs() <= half;
    let top = !bottom && (point.y - geometry.y).abs() <= half;

    match (top, right, bottom, left) {
        (true, true, _, _) => Some(ResizeHandle::TopRight),
        (true, _, _, true) => Some(ResizeHandle::TopLeft),
        (_, true, true, _) => Some(ResizeHandle::BottomRight),
        (_, _, true, true) => Some(ResizeHandle::BottomLeft),
        (true, _, _, _) => Some(ResizeHandle::Top),
        (_, true, _, _) => Some(ResizeHandle::Right),
        (_, _, true, _) => Some(ResizeHandle::Bottom),
        (_, _, _, true) => Some(ResizeHandle::Left),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGesture {
    origin: Geometry,
    start: Point,
}

impl DragGesture {
    pub fn new(origin: Geometry, start: Point) -> Self {
        Self { origin, start }
    }

    /// Box moved by the pointer's travel, kept inside `bounds`.
    pub fn preview(&self, pointer: Point, bounds: Bounds) -> Geometry {
        let moved = Geometry {
            x: self.origin.x + (pointer.x - self.start.x),
            y: self.origin.y + (pointer.y - self.start.y),
            ..self.origin
        };
        clamp_to_bounds(moved, bounds.width, bounds.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeGesture {
    origin: Geometry,
    start: Point,
    handle: ResizeHandle,
}

impl ResizeGesture {
    pub fn new(origin: Geometry, start: Point, handle: ResizeHandle) -> Self {
        Self {
            origin,
            start,
            handle,
        }
    }

    pub fn handle(&self) -> ResizeHandle {
        self.handle
    }

    /// Box with the grabbed edges moved and the opposite edges anchored.
    ///
    /// Dragging an edge past its anchor flips the box rather than producing a
    /// negative size.
    pub fn preview(&self, pointer: Point, bounds: Bounds) -> Geometry {
        let dx = pointer.x - self.start.x;
        let dy = pointer.y - self.start.y;
        let origin = self.origin;

        let (x, width) = if self.handle.moves_left() {
            span(origin.x + dx, origin.right(), bounds.width)
        } else if self.handle.moves_right() {
            span(origin.right() + dx, origin.x, bounds.width)
        } else {
            (origin.x, origin.width)
        };

        let (y, height) = if self.handle.moves_top() {
            span(origin.y + dy, origin.bottom(), bounds.height)
        } else if self.handle.moves_bottom() {
            span(origin.bottom() + dy, origin.y, bounds.height)
        } else {
            (origin.y, origin.height)
        };

        clamp_to_bounds(Geometry::new(x, y, width, height), bounds.width, bounds.height)
    }
}

/// Origin and extent between a moving edge and a fixed one.
fn span(moving: f64, fixed: f64, limit: f64) -> (f64, f64) {
    let moving = moving.clamp(0.0, limit.max(0.0));
    (moving.min(fixed), (moving - fixed).abs())
}
