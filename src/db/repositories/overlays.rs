use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{finite, parse_datetime, parse_kind},
    Database,
};
use crate::models::{Geometry, NewOverlay, Overlay, OverlayKey, OverlayUpdate};

const OVERLAY_COLUMNS: &str = "id, kind, content, x, y, width, height, created_at, updated_at";

/// Stored overlay with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct OverlayRecord {
    pub overlay: Overlay,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_record(row: &Row) -> Result<OverlayRecord> {
    let kind: String = row.get("kind")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(OverlayRecord {
        overlay: Overlay {
            key: OverlayKey::new(),
            id: Some(row.get("id")?),
            kind: parse_kind(&kind)?,
            content: row.get("content")?,
            geometry: Geometry::new(
                row.get("x")?,
                row.get("y")?,
                row.get("width")?,
                row.get("height")?,
            ),
        },
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Inserts an overlay under a freshly generated id.
    pub async fn insert_overlay(&self, input: &NewOverlay) -> Result<OverlayRecord> {
        let input = input.clone();
        self.execute(move |conn| {
            let id = Uuid::new_v4().simple().to_string();
            let now = Utc::now();
            let g = input.geometry;

            conn.execute(
                "INSERT INTO overlays (id, kind, content, x, y, width, height, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    input.kind.as_str(),
                    input.content,
                    finite(g.x, "x")?,
                    finite(g.y, "y")?,
                    finite(g.width, "width")?,
                    finite(g.height, "height")?,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert overlay")?;

            let record = conn
                .query_row(
                    &format!("SELECT {OVERLAY_COLUMNS} FROM overlays WHERE id = ?1"),
                    params![id],
                    |row| Ok(row_to_record(row)),
                )
                .optional()?
                .ok_or_else(|| anyhow!("overlay not found after insert"))??;

            Ok(record)
        })
        .await
    }

    /// All overlays in insertion order.
    pub async fn list_overlays(&self) -> Result<Vec<OverlayRecord>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {OVERLAY_COLUMNS} FROM overlays ORDER BY seq ASC"))?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn get_overlay(&self, id: &str) -> Result<Option<OverlayRecord>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {OVERLAY_COLUMNS} FROM overlays WHERE id = ?1"))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_record(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Sets geometry and content; returns whether a row matched.
    pub async fn update_overlay(&self, id: &str, update: &OverlayUpdate) -> Result<bool> {
        let id = id.to_string();
        let update = update.clone();
        self.execute(move |conn| {
            let g = update.geometry;
            let rows_affected = conn
                .execute(
                    "UPDATE overlays
                     SET x = ?1, y = ?2, width = ?3, height = ?4, content = ?5, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        finite(g.x, "x")?,
                        finite(g.y, "y")?,
                        finite(g.width, "width")?,
                        finite(g.height, "height")?,
                        update.content,
                        Utc::now().to_rfc3339(),
                        id,
                    ],
                )
                .with_context(|| "failed to update overlay")?;
            Ok(rows_affected > 0)
        })
        .await
    }

    /// Removes an overlay; returns whether a row matched.
    pub async fn delete_overlay(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute("DELETE FROM overlays WHERE id = ?1", params![id])
                .with_context(|| "failed to delete overlay")?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
