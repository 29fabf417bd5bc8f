use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::OverlayKind;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_kind(value: &str) -> Result<OverlayKind> {
    OverlayKind::parse(value).ok_or_else(|| anyhow!("unknown overlay kind {value}"))
}

/// Rejects NaN and infinities, which SQLite would store as NULL or garbage.
pub fn finite(value: f64, field: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(anyhow!("{field} must be a finite number, got {value}"))
    }
}
