//! The object-finalized callback: decide, download, sanitize, rewrite.
//!
//! The decision logic is two checks — the content-type gate and the
//! processed-marker check. The marker is what keeps the rewrite from
//! triggering itself forever: every sanitized object is uploaded with
//! `processed=true`, and every invocation skips objects that carry it.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;

use crate::config::Config;
use crate::event::ObjectFinalizedEvent;
use crate::sanitize;
use crate::storage::{ObjectMeta, ObjectStore};

/// Custom metadata key marking an object as already sanitized.
pub const PROCESSED_KEY: &str = "processed";
/// Value the marker is set to.
pub const PROCESSED_VALUE: &str = "true";

/// Why an object was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage,
    AlreadyProcessed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnImage => write!(f, "not an image"),
            Self::AlreadyProcessed => write!(f, "already processed"),
        }
    }
}

/// The guard's verdict for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Process,
    Skip(SkipReason),
}

/// Decide whether an object should be sanitized.
///
/// Skips anything without an `image/` content type, and anything whose
/// metadata already carries `processed=true`.
///
/// # Example
///
/// ```rust
/// use exif_scrub::handler::{Decision, SkipReason, evaluate};
/// use std::collections::HashMap;
///
/// let empty = HashMap::new();
/// assert_eq!(evaluate(Some("image/jpeg"), &empty), Decision::Process);
/// assert_eq!(
///     evaluate(Some("text/plain"), &empty),
///     Decision::Skip(SkipReason::NotAnImage)
/// );
/// ```
pub fn evaluate(content_type: Option<&str>, metadata: &HashMap<String, String>) -> Decision {
    match content_type {
        Some(ct) if ct.starts_with("image/") => {}
        _ => return Decision::Skip(SkipReason::NotAnImage),
    }

    if metadata.get(PROCESSED_KEY).map(String::as_str) == Some(PROCESSED_VALUE) {
        return Decision::Skip(SkipReason::AlreadyProcessed);
    }

    Decision::Process
}

/// What a single invocation did.
#[derive(Debug)]
pub enum Outcome {
    /// The guard said no; nothing was downloaded or written.
    Skipped(SkipReason),
    /// The object was sanitized and rewritten in place.
    Sanitized { bytes_in: usize, bytes_out: usize },
    /// The image could not be sanitized (corrupt, unsupported format).
    /// Logged; no write happened. Not an `Err` — redelivering the event
    /// would fail the same way.
    Failed(String),
}

/// Entry point for an object-finalized event.
///
/// Evaluates the guard on the event payload first (a skip costs nothing),
/// then re-fetches the object's current metadata and runs the full flow —
/// events can be redelivered after the object has already been rewritten.
///
/// Transport failures come back as `Err`; a failed image decode is reported
/// as [`Outcome::Failed`] and the invocation still succeeds.
pub async fn handle_event(
    store: &dyn ObjectStore,
    event: &ObjectFinalizedEvent,
    config: &Config,
) -> Result<Outcome> {
    if let Decision::Skip(reason) = evaluate(event.content_type.as_deref(), &event.metadata) {
        log::info!("Skipping '{}': {reason}", event.name);
        return Ok(Outcome::Skipped(reason));
    }

    let meta = store
        .head(&event.name)
        .await
        .with_context(|| format!("Failed to fetch metadata for '{}'", event.name))?;

    handle_object(store, &meta, config).await
}

/// Sanitize a single object in place, given its current metadata record.
pub async fn handle_object(
    store: &dyn ObjectStore,
    meta: &ObjectMeta,
    config: &Config,
) -> Result<Outcome> {
    if let Decision::Skip(reason) = evaluate(meta.content_type.as_deref(), &meta.metadata) {
        log::info!("Skipping '{}': {reason}", meta.name);
        return Ok(Outcome::Skipped(reason));
    }
    let content_type = meta.content_type.as_deref().unwrap_or_default();

    log::info!("Processing image: {}", meta.name);

    let bytes = store
        .download(&meta.name)
        .await
        .with_context(|| format!("Failed to download '{}'", meta.name))?;

    let sanitized = match sanitize::strip_metadata(&bytes, content_type, &config.sanitizer) {
        Ok(sanitized) => sanitized,
        Err(e) => {
            log::error!("Failed to sanitize '{}': {e:#}", meta.name);
            return Ok(Outcome::Failed(format!("{e:#}")));
        }
    };

    // Keep whatever custom metadata the upload carried; the marker is what
    // prevents the rewrite from re-triggering this handler.
    let mut metadata = meta.metadata.clone();
    metadata.insert(PROCESSED_KEY.to_string(), PROCESSED_VALUE.to_string());

    if config.output.dry_run {
        log::info!(
            "DRY RUN — would overwrite '{}' ({} → {} bytes)",
            meta.name,
            bytes.len(),
            sanitized.bytes.len()
        );
        return Ok(Outcome::Sanitized {
            bytes_in: bytes.len(),
            bytes_out: sanitized.bytes.len(),
        });
    }

    store
        .upload(&meta.name, &sanitized.bytes, content_type, &metadata)
        .await
        .with_context(|| format!("Failed to upload sanitized '{}'", meta.name))?;

    log::info!(
        "Sanitized image uploaded to '{}' ({} → {} bytes)",
        meta.name,
        bytes.len(),
        sanitized.bytes.len()
    );

    Ok(Outcome::Sanitized {
        bytes_in: bytes.len(),
        bytes_out: sanitized.bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{exif_segment_present, has_metadata};
    use crate::storage::FsObjectStore;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use img_parts::jpeg::Jpeg;
    use img_parts::{Bytes, ImageEXIF};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([128u8, 64u8, 32u8]));
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg).unwrap();
        data
    }

    /// JPEG carrying a minimal EXIF block (single orientation tag).
    fn create_exif_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&[0u8, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let mut jpeg = Jpeg::from_bytes(Bytes::from(create_test_jpeg(width, height))).unwrap();
        jpeg.set_exif(Some(Bytes::from(tiff)));
        jpeg.encoder().bytes().to_vec()
    }

    fn processed_metadata() -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert(PROCESSED_KEY.to_string(), PROCESSED_VALUE.to_string());
        metadata
    }

    // ── evaluate ─────────────────────────────────────────────────────

    #[test]
    fn evaluate_accepts_unprocessed_images() {
        assert_eq!(evaluate(Some("image/jpeg"), &HashMap::new()), Decision::Process);
        assert_eq!(evaluate(Some("image/png"), &HashMap::new()), Decision::Process);
    }

    #[test]
    fn evaluate_skips_non_images() {
        assert_eq!(
            evaluate(Some("text/plain"), &HashMap::new()),
            Decision::Skip(SkipReason::NotAnImage)
        );
        assert_eq!(
            evaluate(Some("application/pdf"), &HashMap::new()),
            Decision::Skip(SkipReason::NotAnImage)
        );
        assert_eq!(evaluate(None, &HashMap::new()), Decision::Skip(SkipReason::NotAnImage));
    }

    #[test]
    fn evaluate_skips_processed_images() {
        assert_eq!(
            evaluate(Some("image/jpeg"), &processed_metadata()),
            Decision::Skip(SkipReason::AlreadyProcessed)
        );
    }

    #[test]
    fn evaluate_ignores_other_marker_values() {
        let mut metadata = HashMap::new();
        metadata.insert(PROCESSED_KEY.to_string(), "false".to_string());
        assert_eq!(evaluate(Some("image/jpeg"), &metadata), Decision::Process);
    }

    // ── handle_object ────────────────────────────────────────────────

    #[tokio::test]
    async fn non_image_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("notes.txt", b"hello", "text/plain", &HashMap::new())
            .await
            .unwrap();

        let meta = store.head("notes.txt").await.unwrap();
        let outcome = handle_object(&store, &meta, &Config::default()).await.unwrap();

        assert!(matches!(outcome, Outcome::Skipped(SkipReason::NotAnImage)));
        assert_eq!(store.download("notes.txt").await.unwrap(), b"hello");
        assert!(!store.head("notes.txt").await.unwrap().metadata.contains_key(PROCESSED_KEY));
    }

    #[tokio::test]
    async fn processed_image_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let original = create_exif_jpeg(10, 10);
        store
            .upload("photo.jpg", &original, "image/jpeg", &processed_metadata())
            .await
            .unwrap();

        let meta = store.head("photo.jpg").await.unwrap();
        let outcome = handle_object(&store, &meta, &Config::default()).await.unwrap();

        assert!(matches!(outcome, Outcome::Skipped(SkipReason::AlreadyProcessed)));
        assert_eq!(store.download("photo.jpg").await.unwrap(), original);
    }

    #[tokio::test]
    async fn sanitizes_unprocessed_jpeg() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let original = create_exif_jpeg(16, 16);
        assert!(exif_segment_present(&original));

        store
            .upload("uploads/photo.jpg", &original, "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let meta = store.head("uploads/photo.jpg").await.unwrap();
        let outcome = handle_object(&store, &meta, &Config::default()).await.unwrap();
        assert!(matches!(outcome, Outcome::Sanitized { .. }));

        let rewritten = store.download("uploads/photo.jpg").await.unwrap();
        assert!(!has_metadata(&rewritten));
        assert!(!exif_segment_present(&rewritten));

        let meta = store.head("uploads/photo.jpg").await.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(meta.metadata.get(PROCESSED_KEY).map(String::as_str), Some(PROCESSED_VALUE));
    }

    #[tokio::test]
    async fn rerun_on_own_output_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("photo.jpg", &create_exif_jpeg(12, 12), "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let meta = store.head("photo.jpg").await.unwrap();
        let first = handle_object(&store, &meta, &Config::default()).await.unwrap();
        assert!(matches!(first, Outcome::Sanitized { .. }));
        let after_first = store.download("photo.jpg").await.unwrap();

        let meta = store.head("photo.jpg").await.unwrap();
        let second = handle_object(&store, &meta, &Config::default()).await.unwrap();
        assert!(matches!(second, Outcome::Skipped(SkipReason::AlreadyProcessed)));
        assert_eq!(store.download("photo.jpg").await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn preserves_existing_custom_metadata() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let mut metadata = HashMap::new();
        metadata.insert("uid".to_string(), "user-42".to_string());
        store
            .upload("photo.jpg", &create_exif_jpeg(10, 10), "image/jpeg", &metadata)
            .await
            .unwrap();

        let meta = store.head("photo.jpg").await.unwrap();
        handle_object(&store, &meta, &Config::default()).await.unwrap();

        let meta = store.head("photo.jpg").await.unwrap();
        assert_eq!(meta.metadata.get("uid").map(String::as_str), Some("user-42"));
        assert_eq!(meta.metadata.get(PROCESSED_KEY).map(String::as_str), Some(PROCESSED_VALUE));
    }

    #[tokio::test]
    async fn corrupt_image_fails_without_write() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("broken.jpg", b"not a jpeg", "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let meta = store.head("broken.jpg").await.unwrap();
        let outcome = handle_object(&store, &meta, &Config::default()).await.unwrap();

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(store.download("broken.jpg").await.unwrap(), b"not a jpeg");
        assert!(!store.head("broken.jpg").await.unwrap().metadata.contains_key(PROCESSED_KEY));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let original = create_exif_jpeg(10, 10);
        store
            .upload("photo.jpg", &original, "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let mut config = Config::default();
        config.output.dry_run = true;

        let meta = store.head("photo.jpg").await.unwrap();
        let outcome = handle_object(&store, &meta, &config).await.unwrap();

        assert!(matches!(outcome, Outcome::Sanitized { .. }));
        assert_eq!(store.download("photo.jpg").await.unwrap(), original);
        assert!(!store.head("photo.jpg").await.unwrap().metadata.contains_key(PROCESSED_KEY));
    }

    // ── handle_event ─────────────────────────────────────────────────

    #[tokio::test]
    async fn event_flow_sanitizes() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("photo.jpg", &create_exif_jpeg(10, 10), "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let event = ObjectFinalizedEvent {
            bucket: "demo".to_string(),
            name: "photo.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            ..Default::default()
        };

        let outcome = handle_event(&store, &event, &Config::default()).await.unwrap();
        assert!(matches!(outcome, Outcome::Sanitized { .. }));
        assert!(!has_metadata(&store.download("photo.jpg").await.unwrap()));
    }

    #[tokio::test]
    async fn event_level_marker_skips_without_store_access() {
        // The event already says processed — no metadata fetch, no download
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let event = ObjectFinalizedEvent {
            bucket: "demo".to_string(),
            name: "ghost.jpg".to_string(), // does not even exist in the store
            content_type: Some("image/jpeg".to_string()),
            metadata: processed_metadata(),
            ..Default::default()
        };

        let outcome = handle_event(&store, &event, &Config::default()).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::AlreadyProcessed)));
    }

    #[tokio::test]
    async fn stale_event_rechecks_fresh_metadata() {
        // Event predates the rewrite; the store already carries the marker
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("photo.jpg", &create_test_jpeg(10, 10), "image/jpeg", &processed_metadata())
            .await
            .unwrap();

        let event = ObjectFinalizedEvent {
            bucket: "demo".to_string(),
            name: "photo.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            ..Default::default()
        };

        let outcome = handle_event(&store, &event, &Config::default()).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::AlreadyProcessed)));
    }
}
