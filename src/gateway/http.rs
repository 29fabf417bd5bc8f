use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};

use crate::models::{NewOverlay, Overlay, OverlayUpdate};

use super::{decode_overlay_list, NotDelivered, OverlayGateway};

/// REST implementation of [`OverlayGateway`] against `{base}/overlays`.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuses an existing pooled client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}/overlays", self.base_url)
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/overlays/{}", self.base_url, encode_segment(id))
    }
}

#[async_trait]
impl OverlayGateway for HttpGateway {
    async fn list(&self) -> Result<Vec<Overlay>> {
        let url = self.collection_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| send_failed(err, "GET", &url))?;
        let response = ensure_success(response, "list overlays").await?;
        let body = response
            .json::<serde_json::Value>()
            .await
            .context("overlay list is not valid JSON")?;
        decode_overlay_list(body)
    }

    async fn create(&self, overlay: &NewOverlay) -> Result<Overlay> {
        let url = self.collection_url();
        let response = self
            .client
            .post(&url)
            .json(overlay)
            .send()
            .await
            .map_err(|err| send_failed(err, "POST", &url))?;
        let response = ensure_success(response, "create overlay").await?;
        let created: Overlay = response
            .json()
            .await
            .context("create response is not a valid overlay")?;
        if created.id.is_none() {
            return Err(anyhow!("create response carries no overlay id"));
        }
        debug!("Backend created overlay {:?}", created.id);
        Ok(created)
    }

    async fn update(&self, id: &str, update: &OverlayUpdate) -> Result<()> {
        let url = self.item_url(id);
        let response = self
            .client
            .put(&url)
            .json(update)
            .send()
            .await
            .map_err(|err| send_failed(err, "PUT", &url))?;
        ensure_success(response, "update overlay").await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.item_url(id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|err| send_failed(err, "DELETE", &url))?;
        ensure_success(response, "delete overlay").await?;
        Ok(())
    }
}

/// Connection failures never reach the backend and are marked as such.
fn send_failed(err: reqwest::Error, method: &str, url: &str) -> anyhow::Error {
    if err.is_connect() {
        return anyhow::Error::new(NotDelivered::new(format!("{method} {url}: {err}")));
    }
    anyhow::Error::new(err).context(format!("{method} {url} failed"))
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        bail!("{action}: backend answered {status}");
    }
    bail!("{action}: backend answered {status}: {body}")
}

/// Percent-encodes an id for use as a single path segment.
fn encode_segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
