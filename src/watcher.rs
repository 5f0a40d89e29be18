//! Polling watcher for new uploads.
//!
//! A stand-in for trigger infrastructure when running locally: lists the
//! bucket on a fixed interval and feeds each newly appearing image through
//! the handler (and, when enabled, through vision labeling). A priming scan
//! marks everything already present as seen, so only genuinely new uploads
//! are handled.

use anyhow::Result;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, WatcherConfig};
use crate::handler::{self, Outcome};
use crate::storage::{ObjectMeta, ObjectStore};
use crate::vision::{self, AnnotateOutcome, VisionClient};

/// Counters from a single scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub discovered: usize,
    pub sanitized: usize,
    pub tagged: usize,
    pub failed: usize,
}

/// Tracks which objects have been observed so each upload is handled once
/// per watcher run. The handler's own marker check covers everything else —
/// a restarted watcher re-observing sanitized objects skips them there.
pub struct Watcher {
    prefix: String,
    interval: Duration,
    seen: HashSet<String>,
}

impl Watcher {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            interval: Duration::from_secs(config.interval_secs),
            seen: HashSet::new(),
        }
    }

    /// Mark every image currently in the bucket as seen, without handling it.
    /// Returns how many were found.
    pub async fn prime(&mut self, store: &dyn ObjectStore) -> Result<usize> {
        let existing = store.list(&self.prefix).await?;
        let mut count = 0;
        for meta in existing {
            if is_image(&meta) {
                self.seen.insert(meta.name);
                count += 1;
            }
        }
        log::info!("Found {count} existing image(s). These will be skipped.");
        Ok(count)
    }

    /// List once and handle every image not seen before.
    ///
    /// Per-object failures are logged and counted; they never abort the scan.
    pub async fn scan_once(
        &mut self,
        store: &dyn ObjectStore,
        config: &Config,
        vision: Option<&VisionClient>,
    ) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        for meta in store.list(&self.prefix).await? {
            if !is_image(&meta) || self.seen.contains(&meta.name) {
                continue;
            }
            self.seen.insert(meta.name.clone());
            report.discovered += 1;
            log::info!("New image detected: {}", meta.name);

            match handler::handle_object(store, &meta, config).await {
                Ok(Outcome::Sanitized { .. }) => report.sanitized += 1,
                Ok(Outcome::Skipped(_)) => {}
                Ok(Outcome::Failed(_)) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    log::error!("Failed to process '{}': {e:#}", meta.name);
                }
            }

            if let Some(client) = vision {
                match vision::annotate_object(store, client, &meta.name).await {
                    Ok(AnnotateOutcome::Tagged(_)) => report.tagged += 1,
                    Ok(AnnotateOutcome::Skipped) => {}
                    Err(e) => {
                        report.failed += 1;
                        log::error!("Failed to annotate '{}': {e:#}", meta.name);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Prime, then scan forever on the configured interval.
    pub async fn run(
        &mut self,
        store: &dyn ObjectStore,
        config: &Config,
        vision: Option<&VisionClient>,
    ) -> Result<()> {
        log::info!("Starting storage watcher");
        log::info!("Watching prefix: '{}'", self.prefix);
        log::info!("Check interval: {} seconds", self.interval.as_secs());

        self.prime(store).await?;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.scan_once(store, config, vision).await {
                Ok(report) if report.discovered > 0 => {
                    log::info!(
                        "Scan: {} new, {} sanitized, {} tagged, {} failed",
                        report.discovered,
                        report.sanitized,
                        report.tagged,
                        report.failed
                    );
                }
                Ok(_) => {}
                Err(e) => log::error!("Scan failed: {e:#}"),
            }
        }
    }
}

fn is_image(meta: &ObjectMeta) -> bool {
    meta.content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"))
}
