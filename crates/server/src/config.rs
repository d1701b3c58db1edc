use artifacts::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use common::{Environment, LogLevel};
use detector::DetectorConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on `file` fields accepted in one request.
    pub max_batch_files: usize,
    /// Period of the background purge; 0 disables it.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_batch_files: 16,
            cleanup_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub url_prefix: String,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub max_age_hours: u64,
    pub retain_uploads: bool,
}

impl StorageSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            url_prefix: "/static".to_string(),
            max_file_size_bytes: 16 * MIB,
            allowed_extensions: IMAGE_EXTENSIONS
                .iter()
                .chain(VIDEO_EXTENSIONS)
                .map(|ext| ext.to_string())
                .collect(),
            max_age_hours: 24,
            retain_uploads: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    #[serde(flatten)]
    pub engine: DetectorConfig,
    /// Wall-clock ceiling for one file, including all of its video frames.
    pub inference_timeout_secs: u64,
    /// Refuse to start when the model cannot be loaded.
    pub require_model: bool,
}

impl DetectorSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs.max(1))
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            engine: DetectorConfig::default(),
            inference_timeout_secs: 120,
            require_model: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub environment: Environment,
    pub otel_endpoint: Option<String>,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub detector: DetectorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            environment: Environment::Development,
            otel_endpoint: None,
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            detector: DetectorSettings::default(),
        }
    }
}

impl Settings {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Largest request body the detect route will read.
    pub fn body_limit(&self) -> usize {
        let files = self.server.max_batch_files.max(1) as u64;
        self.storage
            .max_file_size_bytes
            .saturating_mul(files)
            .saturating_add(MIB) as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        let prefix = self.storage.url_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err("storage.url_prefix must not be the site root".to_string());
        }
        if self.storage.max_file_size_bytes == 0 {
            return Err("storage.max_file_size_bytes must be non-zero".to_string());
        }
        if self.storage.allowed_extensions.is_empty() {
            return Err("storage.allowed_extensions must not be empty".to_string());
        }
        if self.server.max_batch_files == 0 {
            return Err("server.max_batch_files must be at least 1".to_string());
        }
        self.detector
            .engine
            .validate()
            .map_err(|e| format!("detector: {}", e))
    }

    /// Create default configuration for testing
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let mut settings = Self::default();
        settings.storage.root = root.into();
        settings.server.cleanup_interval_secs = 0;
        settings.detector.engine = DetectorConfig::test_default();
        settings
    }
}

/// Defaults, then `detect.toml` if present, then `DETECT_*` variables.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("detect").required(false))
        .add_source(
            config::Environment::with_prefix("DETECT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("storage.allowed_extensions")
                .with_list_parse_key("detector.classes")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = config.try_deserialize::<Settings>()?;

    settings.validate().map_err(config::ConfigError::Message)?;

    Ok(settings)
}
