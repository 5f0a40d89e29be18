use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default production endpoint for the storage JSON API.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Top-level configuration for the exif-scrub library.
///
/// Controls which bucket to operate on, how images are re-encoded,
/// the optional Vision labeling service, and the upload watcher cadence.
///
/// # Loading
///
/// ```rust,no_run
/// use exif_scrub::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.storage.bucket = "my-project.appspot.com".into();
/// config.storage.emulator_host = Some("127.0.0.1:9199".into());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Object store to operate on (bucket, emulator, credentials).
    pub storage: StorageConfig,
    /// Image re-encoding behavior.
    pub sanitizer: SanitizerConfig,
    /// Cloud Vision label detection (optional post-processing step).
    pub vision: VisionConfig,
    /// Upload watcher cadence and scope.
    pub watcher: WatcherConfig,
    /// Output behavior (dry run).
    pub output: OutputConfig,
}

/// Object store configuration.
///
/// When `emulator_host` is set, all storage requests go to
/// `http://<emulator_host>` instead of the production endpoint, and no
/// credentials are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket name, e.g. `my-project.appspot.com`.
    pub bucket: String,
    /// Local emulator `host:port`, e.g. `127.0.0.1:9199`.
    pub emulator_host: Option<String>,
    /// Bearer token for production access. Not needed for the emulator.
    pub auth_token: Option<String>,
}

impl StorageConfig {
    /// The base URL every storage request is built against.
    pub fn base_url(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{host}"),
            None => DEFAULT_STORAGE_ENDPOINT.to_string(),
        }
    }
}

/// Controls how sanitized images are re-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// JPEG re-encode quality (1–100). Re-encoding is lossy; keep this high.
    pub jpeg_quality: u8,
    /// Bake the EXIF orientation into the pixels before the tag is dropped,
    /// so the sanitized image still displays upright.
    pub preserve_orientation: bool,
    /// Refuse images wider or taller than this before full decode.
    pub max_dimension: Option<u32>,
}

/// Cloud Vision label detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub enabled: bool,
    pub api_key: String,
    pub endpoint: String,
    /// Upper bound on labels requested per image.
    pub max_labels: u32,
}

/// Upload watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Object name prefix to watch, e.g. `uploads/`. Empty watches the whole bucket.
    pub prefix: String,
    /// Seconds between scans.
    pub interval_secs: u64,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// If `true`, log what would be overwritten without writing anything back.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                bucket: String::new(),
                emulator_host: None,
                auth_token: None,
            },
            sanitizer: SanitizerConfig {
                jpeg_quality: 95,
                preserve_orientation: true,
                max_dimension: Some(16384),
            },
            vision: VisionConfig {
                enabled: false,
                api_key: String::new(),
                endpoint: "https://vision.googleapis.com".to_string(),
                max_labels: 10,
            },
            watcher: WatcherConfig {
                prefix: String::new(),
                interval_secs: 5,
            },
            output: OutputConfig { dry_run: false },
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
