//! Backend gateway: the CRUD surface overlays are persisted through.

mod http;
mod local;

use std::fmt;

use async_trait::async_trait;
use anyhow::{bail, Result};
use serde_json::Value;

use crate::models::{NewOverlay, Overlay, OverlayUpdate};

pub use http::HttpGateway;
pub use local::LocalGateway;

/// Persistence contract for overlays.
///
/// Implementations return overlays with a backend `id`; the client-side key of
/// every returned overlay is freshly generated.
#[async_trait]
pub trait OverlayGateway: Send + Sync {
    /// Lists every stored overlay.
    async fn list(&self) -> Result<Vec<Overlay>>;

    /// Stores a new overlay and returns it with its assigned id.
    async fn create(&self, overlay: &NewOverlay) -> Result<Overlay>;

    /// Overwrites geometry and content of the overlay `id`.
    async fn update(&self, id: &str, update: &OverlayUpdate) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// A request that failed before the backend could have received it.
///
/// Only these failures are safe to repeat for non-idempotent calls such as
/// create: anything else may have been applied with the answer lost.
#[derive(Debug)]
pub struct NotDelivered {
    message: String,
}

impl NotDelivered {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// True when `err` or any of its causes is a [`NotDelivered`].
    pub fn is_cause_of(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<NotDelivered>())
    }
}

impl fmt::Display for NotDelivered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request not delivered: {}", self.message)
    }
}

impl std::error::Error for NotDelivered {}

/// Decodes a backend overlay list one entry at a time.
///
/// An entry that cannot be decoded (missing kind, geometry that is `null` or
/// not a number) is skipped with a warning instead of failing the whole list.
/// Only a body that is not an array at all is an error.
pub(crate) fn decode_overlay_list(body: Value) -> Result<Vec<Overlay>> {
    let Value::Array(entries) = body else {
        bail!("overlay list is not an array");
    };

    let mut overlays = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Overlay>(entry) {
            Ok(overlay) => overlays.push(overlay),
            Err(err) => log::warn!("Skipping overlay #{index} from backend: {err}"),
        }
    }
    Ok(overlays)
}
