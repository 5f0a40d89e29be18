//! Object store access.
//!
//! The [`ObjectStore`] trait is the seam between the handler and the hosting
//! platform. Two adapters are provided:
//!
//! - [`GcsObjectStore`] — the storage JSON API over HTTP, for production and
//!   the local emulator (which speaks the same API on a configurable port)
//! - [`FsObjectStore`] — a plain directory on disk, for tests and offline runs

mod fs;
mod gcs;

pub use fs::FsObjectStore;
pub use gcs::GcsObjectStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Store-side record of an object: its name, content type, and the custom
/// key-value metadata bag where the `processed` and `tagged` markers live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub size: u64,
}

/// Minimal object store surface needed by the handler and watcher.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current metadata record for an object.
    async fn head(&self, name: &str) -> Result<ObjectMeta>;

    /// Download the full object contents.
    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    /// Write an object, replacing any existing contents and custom metadata.
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Merge the given keys into an object's custom metadata without
    /// rewriting its contents.
    async fn patch_metadata(&self, name: &str, metadata: &HashMap<String, String>) -> Result<()>;

    /// List objects under a name prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}
