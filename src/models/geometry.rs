//! Overlay geometry in container-relative pixels.
//!
//! The model itself accepts any numeric geometry. Keeping boxes inside the
//! rendering container is the job of the interaction layer, which calls
//! [`clamp_to_bounds`] before committing a gesture.

use serde::{Deserialize, Deserializer, Serialize};

/// Smallest width/height a clamped box can shrink to.
pub const MIN_OVERLAY_SIZE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub y: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub height: f64,
}

impl Geometry {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Returns a copy with every field present in `patch` replaced.
    pub fn merged(&self, patch: &GeometryPatch) -> Self {
        Self {
            x: patch.x.unwrap_or(self.x),
            y: patch.y.unwrap_or(self.y),
            width: patch.width.unwrap_or(self.width),
            height: patch.height.unwrap_or(self.height),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Partial geometry produced by a gesture. Absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl GeometryPatch {
    /// Position-only patch, as produced by a drag.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Full-box patch, as produced by a resize.
    pub fn full(geometry: Geometry) -> Self {
        Self {
            x: Some(geometry.x),
            y: Some(geometry.y),
            width: Some(geometry.width),
            height: Some(geometry.height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of the rendering container overlays live in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Adjusts `geometry` so it fits inside a `container_width` x `container_height`
/// container anchored at the origin.
///
/// Boxes larger than the container are shrunk to it, then the origin is pulled
/// back inside. Never fails; degenerate containers yield a zero-origin box of
/// the container's size.
pub fn clamp_to_bounds(geometry: Geometry, container_width: f64, container_height: f64) -> Geometry {
    let (x, width) = clamp_axis(geometry.x, geometry.width, container_width);
    let (y, height) = clamp_axis(geometry.y, geometry.height, container_height);
    Geometry {
        x,
        y,
        width,
        height,
    }
}

fn clamp_axis(origin: f64, extent: f64, limit: f64) -> (f64, f64) {
    let limit = if limit.is_finite() { limit.max(0.0) } else { 0.0 };
    let min_extent = MIN_OVERLAY_SIZE.min(limit);

    let extent = if extent.is_finite() { extent } else { min_extent };
    let extent = extent.max(min_extent).min(limit);

    let origin = if origin.is_finite() { origin } else { 0.0 };
    let origin = origin.min(limit - extent).max(0.0);

    (origin, extent)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accepts a JSON number or a string holding a finite number.
///
/// Backends that store whatever the client sent hand geometry back as strings
/// now and then.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {raw:?}"))),
    }
}
