//! Label detection on sanitized images via the Cloud Vision REST API.
//!
//! An optional second stage: once an image is sanitized, its content can be
//! labeled and the labels recorded on the object's own metadata. A `tagged`
//! marker plays the same role the `processed` marker plays for sanitizing —
//! it keeps the annotation from running twice.

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::config::VisionConfig;
use crate::storage::ObjectStore;

/// Custom metadata key marking an object as already labeled.
pub const TAGGED_KEY: &str = "tagged";
/// Value the marker is set to.
pub const TAGGED_VALUE: &str = "true";
/// Custom metadata key the detected labels are recorded under.
pub const LABELS_KEY: &str = "labels";

/// Client for the Cloud Vision `images:annotate` endpoint.
pub struct VisionClient {
    endpoint: String,
    api_key: String,
    max_labels: u32,
    client: Client,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_labels: config.max_labels,
            client: Client::new(),
        }
    }

    /// Detect content labels for an image, most confident first.
    pub async fn detect_labels(&self, image: &[u8]) -> Result<Vec<String>> {
        let image_base64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, image);
        let body = json!({
            "requests": [{
                "image": { "content": image_base64 },
                "features": [{ "type": "LABEL_DETECTION", "maxResults": self.max_labels }]
            }]
        });

        let url = format!("{}/v1/images:annotate?key={}", self.endpoint, self.api_key);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Vision request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read Vision response")?;
        if !status.is_success() {
            bail!("Vision API error ({status}): {text}");
        }

        let json: Value =
            serde_json::from_str(&text).context("Failed to parse Vision response JSON")?;
        parse_label_response(&json)
    }
}

/// Extract label descriptions from an `images:annotate` response.
///
/// The API reports per-image failures in-band, so a 200 response can still
/// carry an error object instead of annotations.
pub fn parse_label_response(response: &Value) -> Result<Vec<String>> {
    let first = response["responses"]
        .get(0)
        .context("Empty Vision response")?;

    if let Some(message) = first["error"]["message"].as_str() {
        bail!("Vision API error: {message}");
    }

    let labels = first["labelAnnotations"]
        .as_array()
        .map(|annotations| {
            annotations
                .iter()
                .filter_map(|label| label["description"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(labels)
}

/// What an annotation pass did.
#[derive(Debug)]
pub enum AnnotateOutcome {
    /// The object already carried the `tagged` marker.
    Skipped,
    /// Labels were detected and recorded on the object's metadata.
    Tagged(Vec<String>),
}

/// Label a single object and record the result on its metadata.
///
/// Metadata is re-fetched first — another invocation may have just rewritten
/// the object — and the `tagged` marker makes a second pass a no-op.
pub async fn annotate_object(
    store: &dyn ObjectStore,
    client: &VisionClient,
    name: &str,
) -> Result<AnnotateOutcome> {
    let meta = store
        .head(name)
        .await
        .with_context(|| format!("Failed to fetch metadata for '{name}'"))?;

    if meta.metadata.get(TAGGED_KEY).map(String::as_str) == Some(TAGGED_VALUE) {
        log::info!("Image '{name}' has already been tagged. Skipping analysis.");
        return Ok(AnnotateOutcome::Skipped);
    }

    log::info!("Analyzing image: {name}");

    let bytes = store
        .download(name)
        .await
        .with_context(|| format!("Failed to download '{name}'"))?;
    let labels = client.detect_labels(&bytes).await?;
    log::info!("Labels detected: {}", labels.join(", "));

    let mut patch = HashMap::new();
    patch.insert(TAGGED_KEY.to_string(), TAGGED_VALUE.to_string());
    if !labels.is_empty() {
        patch.insert(LABELS_KEY.to_string(), labels.join(", "));
    }
    store
        .patch_metadata(name, &patch)
        .await
        .with_context(|| format!("Failed to update metadata for '{name}'"))?;

    log::info!("Metadata updated for '{name}' with '{TAGGED_KEY}' flag");
    Ok(AnnotateOutcome::Tagged(labels))
}
