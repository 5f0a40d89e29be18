use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use super::{ObjectMeta, ObjectStore};

/// Directory holding the JSON metadata sidecars, one per object.
const META_DIR: &str = ".meta";

/// Object store backed by a local directory.
///
/// Objects live at `<root>/<name>`; each object's [`ObjectMeta`] is persisted
/// as JSON under `<root>/.meta/<name>.json`. Files dropped into the root by
/// hand (no sidecar) are still visible — their content type is guessed from
/// the extension, which makes the directory usable as a drop folder.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn meta_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(META_DIR).join(format!("{name}.json")))
    }

    async fn write_meta(&self, meta: &ObjectMeta) -> Result<()> {
        let path = self.meta_path(&meta.name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create metadata directory")?;
        }
        let contents =
            serde_json::to_string_pretty(meta).context("Failed to serialize object metadata")?;
        fs::write(&path, contents)
            .await
            .context("Failed to write object metadata")?;
        Ok(())
    }
}

/// Object names become paths under the store root; refuse anything that
/// could escape it.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Object name is empty");
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("Invalid object name: {name}"),
        }
    }
    Ok(())
}

/// Guess a content type from the file extension, for objects without a
/// metadata sidecar.
fn content_type_for_path(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    };
    Some(mime.to_string())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head(&self, name: &str) -> Result<ObjectMeta> {
        let meta_path = self.meta_path(name)?;
        if meta_path.exists() {
            let contents = fs::read_to_string(&meta_path)
                .await
                .context("Failed to read object metadata")?;
            return serde_json::from_str(&contents).context("Failed to parse object metadata");
        }

        // No sidecar — synthesize a record from the file itself
        let object_path = self.object_path(name)?;
        let file_meta = fs::metadata(&object_path)
            .await
            .with_context(|| format!("No such object: {name}"))?;
        Ok(ObjectMeta {
            name: name.to_string(),
            content_type: content_type_for_path(&object_path),
            metadata: HashMap::new(),
            size: file_meta.len(),
        })
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(name)?;
        fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object: {name}"))
    }

    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create object directory")?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write object: {name}"))?;

        self.write_meta(&ObjectMeta {
            name: name.to_string(),
            content_type: Some(content_type.to_string()),
            metadata: metadata.clone(),
            size: bytes.len() as u64,
        })
        .await?;

        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    async fn patch_metadata(&self, name: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let mut meta = self.head(name).await?;
        for (key, value) in metadata {
            meta.metadata.insert(key.clone(), value.clone());
        }
        self.write_meta(&meta).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let meta_root = self.root.join(META_DIR);
        let mut names = Vec::new();

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || path.starts_with(&meta_root) {
                continue;
            }
            let rel = path
                .strip_prefix(&self.root)
                .context("Walked outside the store root")?;
            let name = rel.to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                names.push(name);
            }
        }

        names.sort();

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            objects.push(self.head(&name).await?);
        }
        Ok(objects)
    }
}
