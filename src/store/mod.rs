pub mod events;
pub mod overlay_store;
mod retry;
pub mod sync_queue;

pub use events::{CanvasEvent, EventBus};
pub use overlay_store::OverlayStore;
pub use sync_queue::SyncOp;
