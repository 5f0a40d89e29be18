use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use super::{ObjectMeta, ObjectStore};
use crate::config::StorageConfig;

// Fixed multipart/related boundary for uploads. Long enough not to collide
// with the JSON part; the media part is length-delimited by the closing
// boundary regardless.
const MULTIPART_BOUNDARY: &str = "exif_scrub_boundary_f81d4fae7dec";

/// Object store adapter for the storage JSON API.
///
/// Talks to the production endpoint by default, or to a local emulator when
/// `emulator_host` is configured — the emulator speaks the same API, minus
/// authentication.
///
/// # Example
///
/// ```rust,no_run
/// use exif_scrub::config::Config;
/// use exif_scrub::storage::GcsObjectStore;
///
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
/// let store = GcsObjectStore::from_config(&config.storage);
/// ```
pub struct GcsObjectStore {
    bucket: String,
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

/// Object record as the JSON API returns it. Numeric fields come back as
/// decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    size: Option<String>,
}

impl From<GcsObject> for ObjectMeta {
    fn from(obj: GcsObject) -> Self {
        let size = obj.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);
        ObjectMeta {
            name: obj.name,
            content_type: obj.content_type,
            metadata: obj.metadata,
            size,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

impl GcsObjectStore {
    pub fn new(bucket: String, base_url: String, auth_token: Option<String>) -> Self {
        Self {
            bucket,
            base_url,
            auth_token,
            client: Client::new(),
        }
    }

    /// Build a store from the storage section of the config file.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.bucket.clone(),
            config.base_url(),
            config.auth_token.clone(),
        )
    }

    /// URL of a single object. The object name is one path segment, so any
    /// `/` inside it must be percent-encoded.
    fn object_url(&self, name: &str) -> Result<Url> {
        let mut url = self.api_root()?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid storage base URL: {}", self.base_url))?
            .push(name);
        Ok(url)
    }

    /// URL of the bucket's object collection (`.../b/<bucket>/o`).
    fn api_root(&self) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).context("Failed to parse storage base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid storage base URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
        Ok(url)
    }

    /// URL of the multipart upload endpoint.
    fn upload_url(&self) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).context("Failed to parse storage base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid storage base URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", self.bucket.as_str(), "o"]);
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }
}

/// Assemble a `multipart/related` upload body: a JSON metadata part followed
/// by the media part.
fn build_multipart_body(meta_json: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + meta_json.len() + 256);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(meta_json.as_bytes());
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn head(&self, name: &str) -> Result<ObjectMeta> {
        let url = self.object_url(name)?;
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .context("Storage metadata request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read storage response")?;
        if !status.is_success() {
            bail!("Storage API error ({status}): {text}");
        }

        let obj: GcsObject =
            serde_json::from_str(&text).context("Failed to parse object metadata")?;
        Ok(obj.into())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let mut url = self.object_url(name)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .context("Storage download request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Storage API error ({status}): {text}");
        }

        let bytes = resp.bytes().await.context("Failed to read object contents")?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let meta_json = json!({
            "name": name,
            "contentType": content_type,
            "metadata": metadata,
        })
        .to_string();
        let body = build_multipart_body(&meta_json, content_type, bytes);

        let resp = self
            .authorize(self.client.post(self.upload_url()?))
            .header(
                "Content-Type",
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .await
            .context("Storage upload request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Storage API error ({status}): {text}");
        }

        log::debug!("Uploaded {} bytes to '{name}'", bytes.len());
        Ok(())
    }

    async fn patch_metadata(&self, name: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let resp = self
            .authorize(self.client.patch(self.object_url(name)?))
            .json(&json!({ "metadata": metadata }))
            .send()
            .await
            .context("Storage metadata patch failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Storage API error ({status}): {text}");
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.api_root()?;
            {
                let mut query = url.query_pairs_mut();
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(ref token) = page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let resp = self
                .authorize(self.client.get(url))
                .send()
                .await
                .context("Storage list request failed")?;

            let status = resp.status();
            let text = resp.text().await.context("Failed to read storage response")?;
            if !status.is_success() {
                bail!("Storage API error ({status}): {text}");
            }

            let page: ListResponse =
                serde_json::from_str(&text).context("Failed to parse object listing")?;
            objects.extend(page.items.into_iter().map(ObjectMeta::from));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }
}
