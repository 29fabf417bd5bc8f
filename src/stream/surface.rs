use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Identity of a video display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identity of one adaptive decoding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One downloaded media segment, ready for the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub sequence: u64,
    pub url: String,
    /// Bandwidth of the rendition the segment was taken from.
    pub bandwidth: u64,
    pub data: Vec<u8>,
}

/// The video element overlays are drawn over.
///
/// Implemented by whatever hosts the video; the engine only decides what gets
/// bound to it and keeps at most one decoder pipeline open per surface.
pub trait DisplaySurface: Send + Sync {
    fn id(&self) -> SurfaceId;

    fn is_mounted(&self) -> bool;

    /// Whether the surface can play `mime` without help.
    fn can_play_type(&self, mime: &str) -> bool;

    /// Whether the surface accepts segments pushed into a decoder pipeline.
    fn supports_adaptive(&self) -> bool;

    /// Points native playback at `url`.
    fn bind_source(&self, url: &str);

    fn clear_source(&self);

    fn open_pipeline(&self, session: SessionId);

    fn push_segment(&self, session: SessionId, segment: MediaSegment);

    fn close_pipeline(&self, session: SessionId);
}
