use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::settings::StreamSettings;

use super::fetcher::MediaFetcher;
use super::manifest::{parse_playlist, BitrateLadder, MediaPlaylist, Playlist, MAX_TARGET_DURATION_SECS};
use super::surface::{DisplaySurface, MediaSegment, SessionId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Weight of the newest sample in the throughput estimate.
const EWMA_ALPHA: f64 = 0.3;
/// Floor for a sample's duration so instant fetches do not divide by zero.
const MIN_SAMPLE_SECS: f64 = 0.001;

/// A running adaptive decoding session bound to one surface.
///
/// Owns a decoder pipeline on the surface from [`AdaptiveSession::spawn`]
/// until [`AdaptiveSession::release`]. Dropping the session without releasing
/// it cancels the fetch task and closes the pipeline as well.
pub struct AdaptiveSession {
    id: SessionId,
    surface: Arc<dyn DisplaySurface>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl AdaptiveSession {
    pub fn spawn(
        surface: Arc<dyn DisplaySurface>,
        source: Url,
        fetcher: Arc<dyn MediaFetcher>,
        settings: StreamSettings,
    ) -> Self {
        let id = SessionId::next();
        surface.open_pipeline(id);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(session_loop(
            id,
            surface.clone(),
            source,
            fetcher,
            settings,
            cancel_token.clone(),
        ));

        Self {
            id,
            surface,
            cancel_token,
            handle: Some(handle),
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// True once the fetch task has stopped on its own or been released.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Stops fetching, waits for the task, then closes the decoder pipeline.
    pub async fn release(mut self) -> Result<()> {
        self.cancel_token.cancel();
        let joined = match self.handle.take() {
            Some(handle) => handle
                .await
                .with_context(|| format!("{} task failed to join", self.id)),
            None => Ok(()),
        };
        self.close_pipeline();
        joined
    }

    fn close_pipeline(&mut self) {
        if !self.closed {
            self.surface.close_pipeline(self.id);
            self.closed = true;
        }
    }
}

impl Drop for AdaptiveSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.close_pipeline();
    }
}

async fn session_loop(
    id: SessionId,
    surface: Arc<dyn DisplaySurface>,
    source: Url,
    fetcher: Arc<dyn MediaFetcher>,
    settings: StreamSettings,
    cancel_token: CancellationToken,
) {
    log_info!("{id} starting for {source}");
    tokio::select! {
        result = run_session(id, surface.as_ref(), &source, fetcher.as_ref(), &settings) => {
            match result {
                Ok(()) => log_info!("{id} reached end of stream"),
                Err(err) => log_warn!("{id} stopped: {err:#}"),
            }
        }
        _ = cancel_token.cancelled() => {
            log_info!("{id} shutting down");
        }
    }
}

async fn run_session(
    id: SessionId,
    surface: &dyn DisplaySurface,
    source: &Url,
    fetcher: &dyn MediaFetcher,
    settings: &StreamSettings,
) -> Result<()> {
    let body = fetcher.fetch_text(source.as_str()).await?;
    let (ladder, mut prefetched) = match parse_playlist(&body, source)? {
        Playlist::Master(ladder) => (ladder, None),
        Playlist::Media(media) => (BitrateLadder::single(source.clone()), Some(media)),
    };

    let mut rung = ladder.lowest();
    let mut throughput = Throughput::default();
    let mut next_sequence: Option<u64> = None;

    loop {
        let Some(variant) = ladder.get(rung) else {
            bail!("rendition {rung} missing from ladder");
        };
        let media = match prefetched.take() {
            Some(media) => media,
            None => fetch_media(fetcher, &variant.uri).await?,
        };

        let mut switched = false;
        for segment in &media.segments {
            if next_sequence.is_some_and(|next| segment.sequence < next) {
                continue;
            }

            let started = Instant::now();
            match fetcher.fetch_bytes(segment.uri.as_str()).await {
                Ok(data) => {
                    throughput.record(data.len(), started.elapsed());
                    surface.push_segment(
                        id,
                        MediaSegment {
                            sequence: segment.sequence,
                            url: segment.uri.to_string(),
                            bandwidth: variant.bandwidth,
                            data,
                        },
                    );
                }
                Err(err) => log_warn!("{id} skipping segment {}: {err:#}", segment.sequence),
            }
            let Some(next) = segment.sequence.checked_add(1) else {
                bail!("media sequence exhausted at {}", segment.sequence);
            };
            next_sequence = Some(next);

            if let Some(estimate) = throughput.estimate() {
                let selected = ladder.select(estimate, settings.abr_safety_factor);
                if selected != rung {
                    log_debug!(
                        "{id} switching rendition {rung} -> {selected} (estimate {:.0} bps)",
                        estimate
                    );
                    rung = selected;
                    switched = true;
                    break;
                }
            }
        }

        if switched {
            continue;
        }
        if media.ended {
            return Ok(());
        }
        tokio::time::sleep(refresh_delay(&media, settings)).await;
    }
}

async fn fetch_media(fetcher: &dyn MediaFetcher, uri: &Url) -> Result<MediaPlaylist> {
    let body = fetcher.fetch_text(uri.as_str()).await?;
    match parse_playlist(&body, uri)? {
        Playlist::Media(media) => Ok(media),
        Playlist::Master(_) => bail!("{uri} is a master playlist, expected media"),
    }
}

/// Half a target duration, but never below the configured floor.
fn refresh_delay(media: &MediaPlaylist, settings: &StreamSettings) -> Duration {
    let ceiling = Duration::from_secs_f64(MAX_TARGET_DURATION_SECS);
    let half_target = Duration::try_from_secs_f64((media.target_duration / 2.0).max(0.0))
        .map_or(ceiling, |delay| delay.min(ceiling));
    half_target.max(Duration::from_millis(settings.min_refresh_ms))
}

/// Exponentially weighted throughput estimate in bits per second.
#[derive(Debug, Default)]
struct Throughput {
    estimate: Option<f64>,
}

impl Throughput {
    fn record(&mut self, bytes: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(MIN_SAMPLE_SECS);
        let sample = bytes as f64 * 8.0 / secs;
        self.estimate = Some(match self.estimate {
            Some(previous) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * previous,
            None => sample,
        });
    }

    fn estimate(&self) -> Option<f64> {
        self.estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeSurface};

    const BASE: &str = "https://cdn.test/live";

    fn settings() -> StreamSettings {
        StreamSettings {
            abr_safety_factor: 0.8,
            min_refresh_ms: 10,
        }
    }

    fn media_playlist(prefix: &str, ended: bool) -> String {
        let mut body = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:0\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for n in 0..3 {
            body.push_str(&format!("#EXTINF:2.0,\n{prefix}/seg{n}.ts\n"));
        }
        if ended {
            body.push_str("#EXT-X-ENDLIST\n");
        }
        body
    }

    fn serve_two_renditions(fetcher: &FakeFetcher, ended: bool) -> Url {
        fetcher.serve_text(
            &format!("{BASE}/master.m3u8"),
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\nhigh/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=200000\nlow/index.m3u8\n",
        );
        for rendition in ["low", "high"] {
            fetcher.serve_text(&format!("{BASE}/{rendition}/index.m3u8"), &media_playlist(rendition, ended));
            for n in 0..3 {
                fetcher.serve_bytes(&format!("{BASE}/{rendition}/{rendition}/seg{n}.ts"), &[0u8; 64_000]);
            }
        }
        Url::parse(&format!("{BASE}/master.m3u8")).unwrap()
    }

    async fn wait_finished(session: &AdaptiveSession) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !session.is_finished() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("session never finished");
    }

    #[tokio::test]
    async fn starts_low_then_moves_up_the_ladder() {
        let fetcher = FakeFetcher::new();
        let source = serve_two_renditions(&fetcher, true);
        let surface = FakeSurface::adaptive();

        let session = AdaptiveSession::spawn(surface.clone(), source, fetcher.clone(), settings());
        let id = session.id();
        wait_finished(&session).await;

        let segments = surface.segments_for(id);
        let sequences: Vec<u64> = segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(segments[0].bandwidth, 200_000);
        assert_eq!(segments[2].bandwidth, 2_000_000);

        session.release().await.unwrap();
        assert_eq!(surface.live_pipelines(), 0);
    }

    #[tokio::test]
    async fn single_media_playlist_plays_as_one_rung() {
        let fetcher = FakeFetcher::new();
        let source = format!("{BASE}/only/index.m3u8");
        fetcher.serve_text(&source, &media_playlist("only", true));
        for n in 0..3 {
            fetcher.serve_bytes(&format!("{BASE}/only/only/seg{n}.ts"), b"ts");
        }
        let surface = FakeSurface::adaptive();

        let session =
            AdaptiveSession::spawn(surface.clone(), Url::parse(&source).unwrap(), fetcher.clone(), settings());
        wait_finished(&session).await;

        assert_eq!(surface.segments_for(session.id()).len(), 3);
    }

    #[tokio::test]
    async fn missing_segments_are_skipped() {
        let fetcher = FakeFetcher::new();
        let source = format!("{BASE}/only/index.m3u8");
        fetcher.serve_text(&source, &media_playlist("only", true));
        fetcher.serve_bytes(&format!("{BASE}/only/only/seg0.ts"), b"ts");
        fetcher.serve_bytes(&format!("{BASE}/only/only/seg2.ts"), b"ts");
        let surface = FakeSurface::adaptive();

        let session =
            AdaptiveSession::spawn(surface.clone(), Url::parse(&source).unwrap(), fetcher.clone(), settings());
        wait_finished(&session).await;

        let sequences: Vec<u64> = surface.segments_for(session.id()).iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 2]);
    }

    #[tokio::test]
    async fn playlist_failure_ends_the_session_quietly() {
        let fetcher = FakeFetcher::new();
        let surface = FakeSurface::adaptive();

        let session = AdaptiveSession::spawn(
            surface.clone(),
            Url::parse(&format!("{BASE}/missing.m3u8")).unwrap(),
            fetcher.clone(),
            settings(),
        );
        wait_finished(&session).await;

        assert!(surface.segments_for(session.id()).is_empty());
        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_stops_a_live_session() {
        let fetcher = FakeFetcher::new();
        let source = serve_two_renditions(&fetcher, false);
        let surface = FakeSurface::adaptive();

        let session = AdaptiveSession::spawn(surface.clone(), source, fetcher.clone(), settings());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!session.is_finished());
        assert_eq!(surface.live_pipelines(), 1);

        tokio::time::timeout(Duration::from_secs(1), session.release())
            .await
            .expect("release hung")
            .unwrap();
        assert_eq!(surface.live_pipelines(), 0);
    }

    #[tokio::test]
    async fn dropping_a_session_closes_its_pipeline() {
        let fetcher = FakeFetcher::new();
        let source = serve_two_renditions(&fetcher, false);
        let surface = FakeSurface::adaptive();

        let session = AdaptiveSession::spawn(surface.clone(), source, fetcher.clone(), settings());
        drop(session);
        assert_eq!(surface.live_pipelines(), 0);
    }

    #[test]
    fn refresh_delay_stays_bounded() {
        let mut media = MediaPlaylist {
            target_duration: 6.0,
            media_sequence: 0,
            segments: Vec::new(),
            ended: false,
        };
        assert_eq!(refresh_delay(&media, &settings()), Duration::from_secs(3));

        media.target_duration = 0.0;
        assert_eq!(refresh_delay(&media, &settings()), Duration::from_millis(10));

        for target in [f64::INFINITY, 1e20] {
            media.target_duration = target;
            assert_eq!(
                refresh_delay(&media, &settings()),
                Duration::from_secs_f64(MAX_TARGET_DURATION_SECS)
            );
        }
    }

    #[tokio::test]
    async fn oversized_target_duration_ends_the_session_cleanly() {
        let fetcher = FakeFetcher::new();
        let source = format!("{BASE}/huge/index.m3u8");
        fetcher.serve_text(
            &source,
            "#EXTM3U\n#EXT-X-TARGETDURATION:99999999999999999999\n#EXTINF:4.0,\nseg0.ts\n",
        );
        let surface = FakeSurface::adaptive();

        let session =
            AdaptiveSession::spawn(surface.clone(), Url::parse(&source).unwrap(), fetcher.clone(), settings());
        wait_finished(&session).await;

        session.release().await.unwrap();
        assert_eq!(surface.live_pipelines(), 0);
    }

    #[test]
    fn throughput_estimate_smooths_samples() {
        let mut throughput = Throughput::default();
        assert!(throughput.estimate().is_none());
        throughput.record(1_000, Duration::from_secs(1));
        assert_eq!(throughput.estimate(), Some(8_000.0));
        throughput.record(2_000, Duration::from_secs(1));
        let expected = EWMA_ALPHA * 16_000.0 + (1.0 - EWMA_ALPHA) * 8_000.0;
        assert!((throughput.estimate().unwrap() - expected).abs() < 1e-6);
    }
}
