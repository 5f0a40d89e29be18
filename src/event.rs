use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payload of a storage object-finalized trigger.
///
/// This is the `data` portion of the event the platform delivers when an
/// object finishes uploading: the bucket, the object path, its content type,
/// and the custom key-value metadata attached at upload time. Numeric fields
/// (`size`, `generation`) arrive as decimal strings on the wire.
///
/// # Example
///
/// ```rust
/// use exif_scrub::event::ObjectFinalizedEvent;
///
/// let event = ObjectFinalizedEvent::from_json(
///     r#"{"bucket": "demo.appspot.com", "name": "uploads/photo.jpg",
///         "contentType": "image/jpeg", "size": "52314"}"#,
/// ).unwrap();
/// assert_eq!(event.name, "uploads/photo.jpg");
/// assert!(event.metadata.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectFinalizedEvent {
    pub bucket: String,
    pub name: String,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub size: Option<String>,
    pub generation: Option<String>,
}

impl ObjectFinalizedEvent {
    /// Parse an event from its JSON wire form.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).context("Failed to parse object-finalized event")
    }
}
