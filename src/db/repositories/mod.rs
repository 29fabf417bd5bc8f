pub mod overlays;

pub use overlays::OverlayRecord;
