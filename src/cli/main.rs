use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use exif_scrub::config::Config;
use exif_scrub::event::ObjectFinalizedEvent;
use exif_scrub::handler::{self, Outcome};
use exif_scrub::sanitize;
use exif_scrub::storage::{FsObjectStore, GcsObjectStore, ObjectStore};
use exif_scrub::vision::{self, AnnotateOutcome, VisionClient};
use exif_scrub::watcher::Watcher;

#[derive(Parser, Debug)]
#[command(
    name = "exif-scrub",
    version,
    about = "Storage-triggered EXIF scrubber — strip embedded metadata from uploaded images and write them back sanitized"
)]
struct Cli {
    /// Handle an object-finalized event from a JSON file
    #[arg(long, value_name = "FILE")]
    event: Option<PathBuf>,

    /// Process a single object by name
    #[arg(long, value_name = "OBJECT")]
    single: Option<String>,

    /// Watch the bucket for new uploads and process them
    #[arg(long)]
    watch: bool,

    /// Report the embedded metadata in a local image file and exit
    #[arg(long, value_name = "FILE")]
    inspect: Option<PathBuf>,

    /// Use a local directory as the object store instead of the bucket
    #[arg(long, value_name = "DIR")]
    local: Option<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Preview what would be overwritten without writing anything back
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Handle --inspect (needs no store)
    if let Some(ref path) = cli.inspect {
        let bytes = std::fs::read(path)?;
        print_metadata_report(path, &bytes);
        return Ok(());
    }

    // Load config
    let mut config = Config::load(cli.config.as_deref())?;

    // Override dry_run from CLI flag
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if config.output.dry_run {
        log::info!("DRY RUN — no objects will be overwritten");
    }

    // Build the object store
    let store: Box<dyn ObjectStore> = match cli.local {
        Some(ref dir) => {
            log::info!("Using local object store at {}", dir.display());
            Box::new(FsObjectStore::new(dir))
        }
        None => {
            if config.storage.bucket.is_empty() {
                anyhow::bail!(
                    "No bucket configured. Run `exif-scrub --init` and set storage.bucket, or pass --local <dir>."
                );
            }
            log::info!("Bucket: {}", config.storage.bucket);
            Box::new(GcsObjectStore::from_config(&config.storage))
        }
    };

    // Vision labeling runs only when enabled and actually writing
    let vision_client = if config.vision.enabled && !config.output.dry_run {
        if config.vision.api_key.is_empty() {
            log::warn!("Vision enabled but no API key configured; skipping labeling");
            None
        } else {
            Some(VisionClient::new(&config.vision))
        }
    } else {
        None
    };

    // Handle --event
    if let Some(ref path) = cli.event {
        let payload = std::fs::read_to_string(path)?;
        let event = ObjectFinalizedEvent::from_json(&payload)?;
        let outcome = handler::handle_event(store.as_ref(), &event, &config).await?;
        report_outcome(&event.name, &outcome);
        return Ok(());
    }

    // Handle --single
    if let Some(ref name) = cli.single {
        let meta = store.head(name).await?;
        let outcome = handler::handle_object(store.as_ref(), &meta, &config).await?;
        report_outcome(name, &outcome);

        if let Some(ref client) = vision_client {
            match vision::annotate_object(store.as_ref(), client, name).await? {
                AnnotateOutcome::Tagged(labels) => {
                    println!("Labels: {}", labels.join(", "));
                }
                AnnotateOutcome::Skipped => {}
            }
        }
        return Ok(());
    }

    // Handle --watch
    if cli.watch {
        let mut watcher = Watcher::new(&config.watcher);
        return watcher
            .run(store.as_ref(), &config, vision_client.as_ref())
            .await;
    }

    anyhow::bail!("No action specified. Use --event, --single, --watch, or --inspect. See --help.");
}

fn report_outcome(name: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Sanitized {
            bytes_in,
            bytes_out,
        } => println!("Sanitized '{name}' ({bytes_in} → {bytes_out} bytes)"),
        Outcome::Skipped(reason) => println!("Skipped '{name}': {reason}"),
        Outcome::Failed(error) => println!("Failed on '{name}': {error}"),
    }
}

fn print_metadata_report(path: &std::path::Path, bytes: &[u8]) {
    let report = sanitize::describe_metadata(bytes);
    println!("{}:", path.display());
    if !report.exif_present {
        println!("  No embedded EXIF metadata");
        return;
    }
    println!("  EXIF present");
    if let Some(orientation) = report.orientation {
        println!("  Orientation: {orientation}");
    }
    if let Some(ref model) = report.camera_model {
        println!("  Camera model: {model}");
    }
    if let Some(ref time) = report.capture_time {
        println!("  Capture time: {time}");
    }
    if report.has_gps {
        println!("  GPS coordinates present");
    }
}
