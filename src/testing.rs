//! Test doubles for the gateway, display surfaces, media fetching and input.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::gateway::{decode_overlay_list, NotDelivered, OverlayGateway};
use crate::interaction::{InputCapture, InputRequest, InputResponse};
use crate::models::{NewOverlay, Overlay, OverlayKey, OverlayUpdate};
use crate::stream::{MediaFetcher, MediaSegment, SessionId, DisplaySurface, SurfaceId};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    List,
    Create(NewOverlay),
    Update(String, OverlayUpdate),
    Delete(String),
}

/// In-memory backend that records calls and can hold or fail them.
pub struct FakeGateway {
    stored: Mutex<Vec<Overlay>>,
    calls: Mutex<Vec<GatewayCall>>,
    raw_list: Mutex<Option<String>>,
    gate: watch::Sender<bool>,
    failures_left: AtomicU64,
    lost_answers_left: AtomicU64,
    fail_all: AtomicBool,
    next_id: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            stored: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            raw_list: Mutex::new(None),
            gate,
            failures_left: AtomicU64::new(0),
            lost_answers_left: AtomicU64::new(0),
            fail_all: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Gateway whose calls block until [`FakeGateway::open_gate`].
    pub fn gated() -> Arc<Self> {
        let gateway = Self::new();
        gateway.gate.send_replace(false);
        gateway
    }

    /// Serves `json` verbatim from `list`, as a backend would.
    pub fn with_list_json(json: &str) -> Arc<Self> {
        let gateway = Self::new();
        *gateway.raw_list.lock().unwrap() = Some(json.to_string());
        gateway
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    /// Makes the next `count` calls fail as refused connections, before
    /// anything is applied.
    pub fn fail_next(&self, count: u64) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls apply their change and then fail as if
    /// the answer timed out.
    pub fn lose_next_answers(&self, count: u64) {
        self.lost_answers_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<Overlay> {
        self.stored.lock().unwrap().clone()
    }

    pub fn seed(&self, overlay: Overlay) {
        self.stored.lock().unwrap().push(overlay);
    }

    async fn enter(&self, call: GatewayCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(NotDelivered::new("connection refused").into());
        }
        Ok(())
    }

    fn answer<T>(&self, value: T) -> Result<T> {
        let lost = self
            .lost_answers_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if lost.is_ok() {
            return Err(anyhow!("operation timed out"));
        }
        Ok(value)
    }
}

#[async_trait]
impl OverlayGateway for FakeGateway {
    async fn list(&self) -> Result<Vec<Overlay>> {
        self.enter(GatewayCall::List).await?;
        let raw = self.raw_list.lock().unwrap().clone();
        match raw {
            Some(json) => decode_overlay_list(serde_json::from_str(&json)?),
            None => Ok(self
                .stored()
                .into_iter()
                .map(|mut overlay| {
                    overlay.key = OverlayKey::new();
                    overlay
                })
                .collect()),
        }
    }

    async fn create(&self, overlay: &NewOverlay) -> Result<Overlay> {
        self.enter(GatewayCall::Create(overlay.clone())).await?;
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let created = Overlay {
            key: OverlayKey::new(),
            id: Some(id),
            kind: overlay.kind,
            content: overlay.content.clone(),
            geometry: overlay.geometry,
        };
        self.stored.lock().unwrap().push(created.clone());
        self.answer(created)
    }

    async fn update(&self, id: &str, update: &OverlayUpdate) -> Result<()> {
        self.enter(GatewayCall::Update(id.to_string(), update.clone()))
            .await?;
        let mut stored = self.stored.lock().unwrap();
        if let Some(overlay) = stored.iter_mut().find(|o| o.id.as_deref() == Some(id)) {
            overlay.geometry = update.geometry;
            overlay.content = update.content.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.enter(GatewayCall::Delete(id.to_string())).await?;
        self.stored
            .lock()
            .unwrap()
            .retain(|o| o.id.as_deref() != Some(id));
        Ok(())
    }
}

/// Display surface that records bindings and decoder pipelines.
pub struct FakeSurface {
    id: SurfaceId,
    mounted: AtomicBool,
    native_types: Mutex<Vec<String>>,
    adaptive: AtomicBool,
    bound_source: Mutex<Option<String>>,
    live_pipelines: AtomicUsize,
    max_live_pipelines: AtomicUsize,
    pipelines_opened: AtomicUsize,
    segments: Mutex<HashMap<SessionId, Vec<MediaSegment>>>,
}

impl FakeSurface {
    /// Mounted surface with adaptive decoding and no native playback.
    pub fn adaptive() -> Arc<Self> {
        Arc::new(Self {
            id: SurfaceId::new(),
            mounted: AtomicBool::new(true),
            native_types: Mutex::new(Vec::new()),
            adaptive: AtomicBool::new(true),
            bound_source: Mutex::new(None),
            live_pipelines: AtomicUsize::new(0),
            max_live_pipelines: AtomicUsize::new(0),
            pipelines_opened: AtomicUsize::new(0),
            segments: Mutex::new(HashMap::new()),
        })
    }

    /// Mounted surface that plays `mime` natively and nothing adaptively.
    pub fn native(mime: &str) -> Arc<Self> {
        let surface = Self::adaptive();
        surface.adaptive.store(false, Ordering::SeqCst);
        surface.native_types.lock().unwrap().push(mime.to_string());
        surface
    }

    pub fn unmounted() -> Arc<Self> {
        let surface = Self::adaptive();
        surface.mounted.store(false, Ordering::SeqCst);
        surface
    }

    pub fn without_playback() -> Arc<Self> {
        let surface = Self::adaptive();
        surface.adaptive.store(false, Ordering::SeqCst);
        surface
    }

    pub fn bound_source(&self) -> Option<String> {
        self.bound_source.lock().unwrap().clone()
    }

    pub fn live_pipelines(&self) -> usize {
        self.live_pipelines.load(Ordering::SeqCst)
    }

    pub fn max_live_pipelines(&self) -> usize {
        self.max_live_pipelines.load(Ordering::SeqCst)
    }

    pub fn pipelines_opened(&self) -> usize {
        self.pipelines_opened.load(Ordering::SeqCst)
    }

    pub fn segments_for(&self, session: SessionId) -> Vec<MediaSegment> {
        self.segments
            .lock()
            .unwrap()
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }
}

impl DisplaySurface for FakeSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn can_play_type(&self, mime: &str) -> bool {
        self.native_types.lock().unwrap().iter().any(|m| m == mime)
    }

    fn supports_adaptive(&self) -> bool {
        self.adaptive.load(Ordering::SeqCst)
    }

    fn bind_source(&self, url: &str) {
        *self.bound_source.lock().unwrap() = Some(url.to_string());
    }

    fn clear_source(&self) {
        *self.bound_source.lock().unwrap() = None;
    }

    fn open_pipeline(&self, _session: SessionId) {
        let live = self.live_pipelines.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_pipelines.fetch_max(live, Ordering::SeqCst);
        self.pipelines_opened.fetch_add(1, Ordering::SeqCst);
    }

    fn push_segment(&self, session: SessionId, segment: MediaSegment) {
        self.segments
            .lock()
            .unwrap()
            .entry(session)
            .or_default()
            .push(segment);
    }

    fn close_pipeline(&self, _session: SessionId) {
        self.live_pipelines.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves canned playlists and segments keyed by URL.
pub struct FakeFetcher {
    texts: Mutex<HashMap<String, String>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            texts: Mutex::new(HashMap::new()),
            bytes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn serve_text(&self, url: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn serve_bytes(&self, url: &str, body: &[u8]) {
        self.bytes
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 {url}"))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 {url}"))
    }
}

/// Input capture that answers from a script, in order.
pub struct ScriptedInput {
    answers: Mutex<VecDeque<InputResponse>>,
    requests: Mutex<Vec<InputRequest>>,
}

impl ScriptedInput {
    pub fn new(answers: impl IntoIterator<Item = InputResponse>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<InputRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputCapture for ScriptedInput {
    async fn request(&self, request: InputRequest) -> InputResponse {
        self.requests.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InputResponse::Cancelled)
    }
}
