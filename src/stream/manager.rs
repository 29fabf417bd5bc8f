use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::settings::StreamSettings;

use super::fetcher::MediaFetcher;
use super::session::AdaptiveSession;
use super::surface::{DisplaySurface, SessionId, SurfaceId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";
pub const DASH_MIME: &str = "application/dash+xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Empty source or unmounted surface; nothing changed.
    Skipped,
    /// The surface plays the source itself.
    Native,
    Adaptive(SessionId),
    /// No way to play the source; the surface stays blank.
    Unsupported,
}

struct Attachment {
    surface: Arc<dyn DisplaySurface>,
    last_url: Option<String>,
    session: Option<AdaptiveSession>,
    /// Source handed to the surface for native playback.
    native: bool,
}

impl Attachment {
    fn new(surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            surface,
            last_url: None,
            session: None,
            native: false,
        }
    }

    /// Tears down whatever currently plays on the surface.
    async fn release(&mut self) {
        if self.native {
            self.surface.clear_source();
            self.native = false;
        }
        if let Some(session) = self.session.take() {
            let id = session.id();
            if let Err(err) = session.release().await {
                log_error!("failed to release {id}: {err:#}");
            } else {
                log_debug!("released {id}");
            }
        }
    }
}

/// Binds stream sources to display surfaces, one decoding session per surface.
///
/// A surface's previous session is always released before anything new is
/// bound to it, and attachments for a surface are serialized, so no surface
/// ever has two decoder pipelines open.
pub struct StreamAttachmentManager {
    fetcher: Arc<dyn MediaFetcher>,
    settings: StreamSettings,
    attachments: Mutex<HashMap<SurfaceId, Attachment>>,
}

impl StreamAttachmentManager {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, settings: StreamSettings) -> Self {
        Self {
            fetcher,
            settings,
            attachments: Mutex::new(HashMap::new()),
        }
    }

    pub async fn attach(&self, surface: Arc<dyn DisplaySurface>, source_url: &str) -> AttachOutcome {
        let mut attachments = self.attachments.lock().await;
        let attachment = attachments
            .entry(surface.id())
            .or_insert_with(|| Attachment::new(surface.clone()));
        attachment.last_url = Some(source_url.to_string());
        attachment.surface = surface;
        self.attach_locked(attachment, source_url).await
    }

    /// Re-attaches only when `source_url` differs from the last one seen for
    /// this surface. Returns `None` when nothing changed.
    pub async fn on_source_changed(
        &self,
        surface: Arc<dyn DisplaySurface>,
        source_url: Option<&str>,
    ) -> Option<AttachOutcome> {
        let mut attachments = self.attachments.lock().await;
        let attachment = attachments
            .entry(surface.id())
            .or_insert_with(|| Attachment::new(surface.clone()));

        if attachment.last_url.as_deref() == source_url {
            return None;
        }
        attachment.last_url = source_url.map(str::to_string);
        attachment.surface = surface;

        // The old source goes away even if the new one cannot be attached.
        attachment.release().await;
        Some(self.attach_locked(attachment, source_url.unwrap_or_default()).await)
    }

    /// Releases whatever is bound to `surface_id`; returns `false` if nothing was.
    pub async fn detach(&self, surface_id: SurfaceId) -> bool {
        let removed = self.attachments.lock().await.remove(&surface_id);
        match removed {
            Some(mut attachment) => {
                attachment.release().await;
                attachment.surface.clear_source();
                log_debug!("detached surface {surface_id}");
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let attachments: Vec<Attachment> = {
            let mut guard = self.attachments.lock().await;
            guard.drain().map(|(_, attachment)| attachment).collect()
        };
        let count = attachments.len();
        for mut attachment in attachments {
            attachment.release().await;
            attachment.surface.clear_source();
        }
        log_info!("stream manager shut down ({count} surfaces)");
    }

    /// Number of adaptive sessions currently holding a decoder pipeline.
    pub async fn active_sessions(&self) -> usize {
        self.attachments
            .lock()
            .await
            .values()
            .filter(|attachment| attachment.session.is_some())
            .count()
    }

    pub async fn session_for(&self, surface_id: SurfaceId) -> Option<SessionId> {
        self.attachments
            .lock()
            .await
            .get(&surface_id)
            .and_then(|attachment| attachment.session.as_ref().map(AdaptiveSession::id))
    }

    async fn attach_locked(&self, attachment: &mut Attachment, source_url: &str) -> AttachOutcome {
        let source_url = source_url.trim();
        let surface = attachment.surface.clone();
        if source_url.is_empty() || !surface.is_mounted() {
            return AttachOutcome::Skipped;
        }

        attachment.release().await;

        let mime = mime_for_url(source_url);
        if let Some(mime) = mime.filter(|mime| surface.can_play_type(mime)) {
            surface.bind_source(source_url);
            attachment.native = true;
            log_info!("surface {} plays {source_url} natively ({mime})", surface.id());
            return AttachOutcome::Native;
        }

        if surface.supports_adaptive() && mime == Some(HLS_MIME) {
            match Url::parse(source_url) {
                Ok(source) => {
                    surface.clear_source();
                    let session = AdaptiveSession::spawn(
                        surface.clone(),
                        source,
                        self.fetcher.clone(),
                        self.settings.clone(),
                    );
                    let id = session.id();
                    attachment.session = Some(session);
                    log_info!("surface {} attached {id} for {source_url}", surface.id());
                    return AttachOutcome::Adaptive(id);
                }
                Err(err) => log_warn!("cannot stream relative or invalid url {source_url}: {err}"),
            }
        }

        log_warn!("surface {} has no way to play {source_url}", surface.id());
        AttachOutcome::Unsupported
    }
}

/// Container MIME type implied by the URL's path extension.
pub fn mime_for_url(url: &str) -> Option<&'static str> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let (_, extension) = path.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "m3u8" => Some(HLS_MIME),
        "mpd" => Some(DASH_MIME),
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeSurface};

    fn live_playlist() -> &'static str {
        "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n"
    }

    fn manager_with_streams(urls: &[&str]) -> (StreamAttachmentManager, Arc<FakeFetcher>) {
        let fetcher = FakeFetcher::new();
        for url in urls {
            fetcher.serve_text(url, live_playlist());
        }
        let settings = StreamSettings {
            abr_safety_factor: 0.8,
            min_refresh_ms: 10,
        };
        (StreamAttachmentManager::new(fetcher.clone(), settings), fetcher)
    }

    const FIRST: &str = "https://cdn.test/a/index.m3u8";
    const SECOND: &str = "https://cdn.test/b/index.m3u8";

    #[tokio::test]
    async fn changing_the_url_keeps_one_session_per_surface() {
        let (manager, _) = manager_with_streams(&[FIRST, SECOND]);
        let surface = FakeSurface::adaptive();

        let first = manager.on_source_changed(surface.clone(), Some(FIRST)).await;
        let second = manager.on_source_changed(surface.clone(), Some(SECOND)).await;
        assert!(matches!(first, Some(AttachOutcome::Adaptive(_))));
        assert!(matches!(second, Some(AttachOutcome::Adaptive(_))));
        assert_ne!(first, second);

        assert_eq!(surface.pipelines_opened(), 2);
        assert_eq!(surface.max_live_pipelines(), 1);
        assert_eq!(surface.live_pipelines(), 1);
        assert_eq!(manager.active_sessions().await, 1);

        manager.shutdown().await;
        assert_eq!(surface.live_pipelines(), 0);
        assert_eq!(manager.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn concurrent_changes_never_overlap_pipelines() {
        let (manager, _) = manager_with_streams(&[FIRST, SECOND]);
        let surface = FakeSurface::adaptive();

        tokio::join!(
            manager.on_source_changed(surface.clone(), Some(FIRST)),
            manager.on_source_changed(surface.clone(), Some(SECOND)),
            manager.attach(surface.clone(), FIRST),
        );

        assert_eq!(surface.max_live_pipelines(), 1);
        assert_eq!(surface.live_pipelines(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unchanged_url_is_ignored() {
        let (manager, _) = manager_with_streams(&[FIRST]);
        let surface = FakeSurface::adaptive();

        assert!(manager.on_source_changed(surface.clone(), Some(FIRST)).await.is_some());
        assert!(manager.on_source_changed(surface.clone(), Some(FIRST)).await.is_none());
        assert_eq!(surface.pipelines_opened(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn native_playback_binds_the_url_directly() {
        let (manager, fetcher) = manager_with_streams(&[]);
        let surface = FakeSurface::native(HLS_MIME);

        assert_eq!(manager.attach(surface.clone(), FIRST).await, AttachOutcome::Native);
        assert_eq!(surface.bound_source().as_deref(), Some(FIRST));
        assert_eq!(surface.pipelines_opened(), 0);
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn native_binding_is_cleared_when_the_url_changes() {
        let (manager, _) = manager_with_streams(&[]);
        let surface = FakeSurface::native(HLS_MIME);

        let native = manager.on_source_changed(surface.clone(), Some(FIRST)).await;
        assert_eq!(native, Some(AttachOutcome::Native));

        let dash = manager
            .on_source_changed(surface.clone(), Some("https://cdn.test/b/manifest.mpd"))
            .await;
        assert_eq!(dash, Some(AttachOutcome::Unsupported));
        assert!(surface.bound_source().is_none());

        manager.on_source_changed(surface.clone(), Some(FIRST)).await;
        assert_eq!(surface.bound_source().as_deref(), Some(FIRST));
        assert_eq!(
            manager.on_source_changed(surface.clone(), None).await,
            Some(AttachOutcome::Skipped)
        );
        assert!(surface.bound_source().is_none());
    }

    #[tokio::test]
    async fn explicit_attach_counts_as_the_last_url() {
        let (manager, _) = manager_with_streams(&[FIRST, SECOND]);
        let surface = FakeSurface::adaptive();

        manager.on_source_changed(surface.clone(), Some(FIRST)).await;
        manager.attach(surface.clone(), SECOND).await;
        let back = manager.on_source_changed(surface.clone(), Some(FIRST)).await;

        assert!(matches!(back, Some(AttachOutcome::Adaptive(_))));
        assert_eq!(surface.pipelines_opened(), 3);
        assert_eq!(surface.live_pipelines(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn empty_urls_and_unmounted_surfaces_are_skipped() {
        let (manager, _) = manager_with_streams(&[]);

        assert_eq!(manager.attach(FakeSurface::adaptive(), "   ").await, AttachOutcome::Skipped);
        assert_eq!(manager.attach(FakeSurface::unmounted(), FIRST).await, AttachOutcome::Skipped);
    }

    #[tokio::test]
    async fn clearing_the_url_releases_the_session() {
        let (manager, _) = manager_with_streams(&[FIRST]);
        let surface = FakeSurface::adaptive();

        manager.on_source_changed(surface.clone(), Some(FIRST)).await;
        let outcome = manager.on_source_changed(surface.clone(), None).await;

        assert_eq!(outcome, Some(AttachOutcome::Skipped));
        assert_eq!(surface.live_pipelines(), 0);
    }

    #[tokio::test]
    async fn surfaces_without_playback_are_unsupported() {
        let (manager, _) = manager_with_streams(&[FIRST]);
        let surface = FakeSurface::without_playback();

        assert_eq!(manager.attach(surface.clone(), FIRST).await, AttachOutcome::Unsupported);
        assert_eq!(manager.attach(FakeSurface::adaptive(), "https://cdn.test/clip.mp4").await, AttachOutcome::Unsupported);
        assert_eq!(surface.pipelines_opened(), 0);
    }

    #[tokio::test]
    async fn detach_releases_and_unbinds() {
        let (manager, _) = manager_with_streams(&[FIRST]);
        let surface = FakeSurface::adaptive();
        manager.attach(surface.clone(), FIRST).await;

        assert!(manager.detach(surface.id()).await);
        assert!(!manager.detach(surface.id()).await);
        assert_eq!(surface.live_pipelines(), 0);
        assert!(manager.session_for(surface.id()).await.is_none());
    }

    #[test]
    fn mime_follows_the_path_extension() {
        assert_eq!(mime_for_url("https://x/live/index.M3U8?token=1"), Some(HLS_MIME));
        assert_eq!(mime_for_url("/media/clip.mp4#t=10"), Some("video/mp4"));
        assert_eq!(mime_for_url("https://x/manifest.mpd"), Some(DASH_MIME));
        assert_eq!(mime_for_url("https://x.example/live"), None);
    }
}
