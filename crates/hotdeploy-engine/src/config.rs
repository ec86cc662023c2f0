//! Deployer configuration
//!
//! [`DeployerConfig`] can be built in code with the `with_*` setters or loaded
//! from a YAML, TOML or JSON file. File values are overridden by `HOTDEPLOY_*`
//! environment variables (for example `HOTDEPLOY_POLL_INTERVAL_MS=250`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as Cfg, Environment, File, FileFormat};
use hotdeploy_kernel::MODULE_CAPABILITY;
use serde::{Deserialize, Serialize};

use crate::domain::is_valid_type_name;

/// Prefix of environment variables overriding file values.
pub const ENV_PREFIX: &str = "HOTDEPLOY";

/// Longest accepted poll interval: one day.
pub const MAX_POLL_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration loading or validation error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// Supported: `.yaml`/`.yml`, `.toml`, `.json`.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Deployer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Directory watched for bundle files
    pub watch_dir: PathBuf,
    /// Name of the staging subdirectory inside `watch_dir`
    pub staging_dir: String,
    /// Bundle file extension, matched case-insensitively
    pub extension: String,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Capability whose implementations are deployed
    pub capability: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("deploy"),
            staging_dir: "tmp".to_string(),
            extension: "pkg".to_string(),
            poll_interval_ms: 1000,
            capability: MODULE_CAPABILITY.to_string(),
        }
    }
}

impl DeployerConfig {
    /// Create a config watching `watch_dir` with default settings
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            ..Self::default()
        }
    }

    /// Set the staging subdirectory name
    pub fn with_staging_dir(mut self, name: &str) -> Self {
        self.staging_dir = name.to_string();
        self
    }

    /// Set the bundle file extension (without the dot)
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extension = ext.trim_start_matches('.').to_string();
        self
    }

    /// Set the polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the deployed capability name
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capability = capability.to_string();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Full path of the staging directory
    pub fn staging_path(&self) -> PathBuf {
        self.watch_dir.join(&self.staging_dir)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.watch_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("watch_dir must not be empty".to_string()));
        }
        let staging = Path::new(&self.staging_dir);
        if self.staging_dir.is_empty() || staging.components().count() != 1 || staging.is_absolute()
        {
            return Err(ConfigError::Invalid(format!(
                "staging_dir must be a single directory name, got `{}`",
                self.staging_dir
            )));
        }
        if self.extension.is_empty() || self.extension.contains(['.', '/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "extension must be a bare file extension, got `{}`",
                self.extension
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must not exceed {MAX_POLL_INTERVAL_MS}"
            )));
        }
        if !is_valid_type_name(&self.capability) {
            return Err(ConfigError::Invalid(format!(
                "capability `{}` is not a valid type name",
                self.capability
            )));
        }
        Ok(())
    }

    /// Load a config file, applying `HOTDEPLOY_*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        if !path.is_file() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        let cfg = Cfg::builder()
            .add_source(File::from(path).format(format))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        Self::finish(cfg)
    }

    /// Parse config text in an explicit format, without environment overrides
    pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let cfg = Cfg::builder()
            .add_source(File::from_str(content, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        Self::finish(cfg)
    }

    fn finish(cfg: Cfg) -> ConfigResult<Self> {
        let config: Self = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
