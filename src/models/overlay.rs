//! Overlay entity and its wire representations.
//!
//! On the wire the backend names the identity `_id` and the kind `type`;
//! both are also accepted under `id` and `kind`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::geometry::Geometry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Text,
    Image,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Text => "text",
            OverlayKind::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(OverlayKind::Text),
            "image" => Some(OverlayKind::Image),
            _ => None,
        }
    }
}

/// Client-side handle for an overlay.
///
/// Stable for the whole page session, including the window where a freshly
/// created overlay has no backend id yet. Never sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayKey(Uuid);

impl OverlayKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OverlayKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to follow one overlay through the logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    #[serde(skip)]
    pub key: OverlayKey,
    /// Backend identity; `None` while the create call is outstanding or failed.
    #[serde(rename = "_id", alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", alias = "kind")]
    pub kind: OverlayKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(flatten)]
    pub geometry: Geometry,
}

impl Overlay {
    /// Builds a provisional overlay that has not reached the backend yet.
    pub fn provisional(kind: OverlayKind, content: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            key: OverlayKey::new(),
            id: None,
            kind,
            content: content.into(),
            geometry,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// Backends that overwrite whole records store `null` for fields a client left out.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOverlay {
    #[serde(rename = "type", alias = "kind")]
    pub kind: OverlayKind,
    pub content: String,
    #[serde(flatten)]
    pub geometry: Geometry,
}

impl From<&Overlay> for NewOverlay {
    fn from(overlay: &Overlay) -> Self {
        Self {
            kind: overlay.kind,
            content: overlay.content.clone(),
            geometry: overlay.geometry,
        }
    }
}

/// Body of an update request: the full resulting geometry plus content.
///
/// Sending every field keeps backends that overwrite the whole record from
/// nulling out values a partial body would omit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayUpdate {
    #[serde(flatten)]
    pub geometry: Geometry,
    pub content: String,
}

impl From<&Overlay> for OverlayUpdate {
    fn from(overlay: &Overlay) -> Self {
        Self {
            geometry: overlay.geometry,
            content: overlay.content.clone(),
        }
    }
}
