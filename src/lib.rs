//! # exif-scrub
//!
//! Storage-triggered EXIF scrubber — when an image lands in a bucket, strip
//! its embedded metadata by decoding and re-encoding the pixels, then write
//! it back in place with a `processed=true` marker so the rewrite does not
//! trigger reprocessing.
//!
//! ## Quick Start
//!
//! The handler module is the entry point: feed it an object-finalized event
//! and a store, and it takes care of the guard, download, sanitize, and
//! rewrite:
//!
//! ```rust,no_run
//! use exif_scrub::config::Config;
//! use exif_scrub::event::ObjectFinalizedEvent;
//! use exif_scrub::handler;
//! use exif_scrub::storage::GcsObjectStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load config from file (bucket, emulator host, sanitizer knobs, etc.)
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let store = GcsObjectStore::from_config(&config.storage);
//!
//!     // The event JSON as delivered by the platform trigger
//!     let payload = std::fs::read_to_string("event.json")?;
//!     let event = ObjectFinalizedEvent::from_json(&payload)?;
//!
//!     handler::handle_event(&store, &event, &config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The sanitizing transform works on plain byte slices and can be used
//! without any store at all:
//!
//! ```rust,no_run
//! use exif_scrub::config::Config;
//! use exif_scrub::sanitize::{has_metadata, strip_metadata};
//!
//! let config = Config::default();
//! let original = std::fs::read("photo.jpg").unwrap();
//!
//! let sanitized = strip_metadata(&original, "image/jpeg", &config.sanitizer).unwrap();
//! assert!(!has_metadata(&sanitized.bytes));
//! ```
//!
//! ## Guard Semantics
//!
//! An object is sanitized only when both checks pass:
//!
//! | Check | Skip condition |
//! |-------|---------------|
//! | Content-type gate | content type absent or not `image/*` |
//! | Idempotency marker | metadata already carries `processed=true` |
//!
//! The guard runs on the event payload and again on freshly fetched
//! metadata, so redelivered events stay no-ops.
//!
//! ## Modules
//!
//! - [`config`] — configuration types and loading/saving
//! - [`event`] — the object-finalized trigger payload
//! - [`handler`] — the guard and the sanitize-and-rewrite callback
//! - [`sanitize`] — the metadata-stripping image transform
//! - [`storage`] — object store trait with HTTP and filesystem adapters
//! - [`vision`] — optional Cloud Vision labeling of sanitized images
//! - [`watcher`] — polling watcher for running without trigger infrastructure

pub mod config;
pub mod event;
pub mod handler;
pub mod sanitize;
pub mod storage;
pub mod vision;
pub mod watcher;
