use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use crate::db::Database;
use crate::models::{NewOverlay, Overlay, OverlayUpdate};

use super::OverlayGateway;

/// [`OverlayGateway`] backed by a local SQLite database.
///
/// Mirrors the REST backend: updates and deletes of unknown ids succeed
/// without effect.
#[derive(Clone)]
pub struct LocalGateway {
    db: Database,
}

impl LocalGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl OverlayGateway for LocalGateway {
    async fn list(&self) -> Result<Vec<Overlay>> {
        let records = self.db.list_overlays().await?;
        Ok(records.into_iter().map(|record| record.overlay).collect())
    }

    async fn create(&self, overlay: &NewOverlay) -> Result<Overlay> {
        let record = self.db.insert_overlay(overlay).await?;
        Ok(record.overlay)
    }

    async fn update(&self, id: &str, update: &OverlayUpdate) -> Result<()> {
        if !self.db.update_overlay(id, update).await? {
            debug!("Update for unknown overlay {id} ignored");
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if !self.db.delete_overlay(id).await? {
            debug!("Delete for unknown overlay {id} ignored");
        }
        Ok(())
    }
}
