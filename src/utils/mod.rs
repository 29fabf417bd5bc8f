pub mod logging;

pub use logging::init_logging;

/// Reads the `OVERLAY_CANVAS_DEBUG` toggle.
pub fn debug_mode() -> bool {
    std::env::var("OVERLAY_CANVAS_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
