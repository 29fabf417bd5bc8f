pub mod db;
pub mod gateway;
pub mod interaction;
pub mod models;
pub mod settings;
pub mod store;
pub mod stream;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use gateway::{HttpGateway, LocalGateway, OverlayGateway};
use interaction::{InputCapture, InteractionController};
use models::Bounds;
use settings::{CanvasSettings, SettingsStore};
use store::OverlayStore;
use stream::{AttachOutcome, DisplaySurface, HttpFetcher, MediaFetcher, StreamAttachmentManager};

pub use utils::init_logging;

/// Container size assumed until the host reports the real one.
pub const DEFAULT_CONTAINER: Bounds = Bounds::new(1280.0, 720.0);

/// Everything one overlay canvas page needs, wired together.
pub struct OverlayCanvas {
    settings: CanvasSettings,
    store: OverlayStore,
    controller: InteractionController,
    streams: StreamAttachmentManager,
}

impl OverlayCanvas {
    pub fn new(
        settings: CanvasSettings,
        gateway: Arc<dyn OverlayGateway>,
        input: Arc<dyn InputCapture>,
    ) -> Result<Self> {
        let fetcher = HttpFetcher::new(settings.request_timeout())?;
        Ok(Self::with_parts(settings, gateway, Arc::new(fetcher), input))
    }

    pub fn with_parts(
        settings: CanvasSettings,
        gateway: Arc<dyn OverlayGateway>,
        fetcher: Arc<dyn MediaFetcher>,
        input: Arc<dyn InputCapture>,
    ) -> Self {
        let store = OverlayStore::new(gateway, settings.retry.clone());
        let controller = InteractionController::new(store.clone(), input, DEFAULT_CONTAINER);
        let streams = StreamAttachmentManager::new(fetcher, settings.stream.clone());
        Self {
            settings,
            store,
            controller,
            streams,
        }
    }

    /// Builds a canvas on the backend `settings` points at: the local database
    /// when `database_path` is set, the REST API otherwise.
    pub fn from_settings(settings: CanvasSettings, input: Arc<dyn InputCapture>) -> Result<Self> {
        let gateway: Arc<dyn OverlayGateway> = match &settings.database_path {
            Some(path) => Arc::new(
                LocalGateway::open(path.clone())
                    .with_context(|| format!("failed to open overlay database {}", path.display()))?,
            ),
            None => Arc::new(HttpGateway::new(
                settings.api_base_url.clone(),
                settings.request_timeout(),
            )?),
        };
        Self::new(settings, gateway, input)
    }

    /// Reads settings from the JSON file at `path` (defaults when missing) and
    /// builds a canvas from them.
    pub fn from_settings_file(path: PathBuf, input: Arc<dyn InputCapture>) -> Result<Self> {
        let store = SettingsStore::new(path)?;
        Self::from_settings(store.get(), input)
    }

    /// Loads the persisted overlays. A failed load leaves the canvas empty
    /// and is not fatal.
    pub async fn start(&self) -> usize {
        log::info!("Overlay canvas starting up...");
        match self.store.load().await {
            Ok(count) => count,
            Err(err) => {
                log::warn!("Starting with no overlays: {err:#}");
                0
            }
        }
    }

    pub async fn set_stream_url(
        &self,
        surface: Arc<dyn DisplaySurface>,
        url: Option<&str>,
    ) -> Option<AttachOutcome> {
        self.streams.on_source_changed(surface, url).await
    }

    /// Points `surface` at the configured default stream.
    pub async fn attach_default_stream(&self, surface: Arc<dyn DisplaySurface>) -> Option<AttachOutcome> {
        let url = self.settings.default_stream_url.clone();
        self.set_stream_url(surface, Some(&url)).await
    }

    /// Waits for pending writes and releases every stream session.
    pub async fn shutdown(&self) {
        self.store.flush().await;
        self.streams.shutdown().await;
        log::info!("Overlay canvas shut down");
    }

    pub fn settings(&self) -> &CanvasSettings {
        &self.settings
    }

    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    pub fn streams(&self) -> &StreamAttachmentManager {
        &self.streams
    }
}
