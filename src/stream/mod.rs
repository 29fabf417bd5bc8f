//! Binding live video sources to display surfaces.

pub mod fetcher;
pub mod manager;
pub mod manifest;
pub mod session;
pub mod surface;

pub use fetcher::{HttpFetcher, MediaFetcher};
pub use manager::{mime_for_url, AttachOutcome, StreamAttachmentManager, HLS_MIME};
pub use manifest::{BitrateLadder, Variant};
pub use session::AdaptiveSession;
pub use surface::{DisplaySurface, MediaSegment, SessionId, SurfaceId};
