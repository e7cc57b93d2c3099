use crate::error::{GeobatchError, Result};
use crate::models::Crs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote payload ceiling of the compute service, in bytes
pub const DEFAULT_BYTE_LIMIT: u64 = 50_331_648;

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Layered configuration for a geobatch run
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub max_workers: ConfigValue<usize>,
    pub max_extract_workers: ConfigValue<usize>,
    pub chunk_size: ConfigValue<usize>,
    pub max_retries: ConfigValue<u32>,
    pub base_retry_delay_ms: ConfigValue<u64>,
    pub request_timeout_secs: ConfigValue<u64>,
    pub scale_m: ConfigValue<f64>,
    pub byte_limit: ConfigValue<u64>,
    pub bytes_per_band: ConfigValue<u32>,
    pub safety_margin: ConfigValue<f64>,
    pub exclude_pattern: ConfigValue<String>,
    pub cleanup_files: ConfigValue<bool>,
    pub max_replans: ConfigValue<u32>,
    pub crs: ConfigValue<String>,
    pub expected_content_type: ConfigValue<String>,
    pub service_url: ConfigValue<Option<String>>,
    pub tile_dir: ConfigValue<PathBuf>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        let extract_workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

        Self {
            max_workers: ConfigValue::new(10, ConfigSource::Default),
            max_extract_workers: ConfigValue::new(extract_workers, ConfigSource::Default),
            chunk_size: ConfigValue::new(25, ConfigSource::Default),
            max_retries: ConfigValue::new(3, ConfigSource::Default),
            base_retry_delay_ms: ConfigValue::new(1000, ConfigSource::Default),
            request_timeout_secs: ConfigValue::new(120, ConfigSource::Default),
            scale_m: ConfigValue::new(10.0, ConfigSource::Default),
            byte_limit: ConfigValue::new(DEFAULT_BYTE_LIMIT, ConfigSource::Default),
            bytes_per_band: ConfigValue::new(4, ConfigSource::Default),
            safety_margin: ConfigValue::new(0.95, ConfigSource::Default),
            exclude_pattern: ConfigValue::new("^decoy_".to_string(), ConfigSource::Default),
            cleanup_files: ConfigValue::new(false, ConfigSource::Default),
            max_replans: ConfigValue::new(3, ConfigSource::Default),
            crs: ConfigValue::new("EPSG:4326".to_string(), ConfigSource::Default),
            expected_content_type: ConfigValue::new(
                "image/tiff".to_string(),
                ConfigSource::Default,
            ),
            service_url: ConfigValue::new(None, ConfigSource::Default),
            tile_dir: ConfigValue::new(PathBuf::from("tiles"), ConfigSource::Default),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| GeobatchError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| GeobatchError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        let source = ConfigSource::File;
        if let Some(v) = file_config.max_workers {
            self.max_workers.update(v, source);
        }
        if let Some(v) = file_config.max_extract_workers {
            self.max_extract_workers.update(v, source);
        }
        if let Some(v) = file_config.chunk_size {
            self.chunk_size.update(v, source);
        }
        if let Some(v) = file_config.max_retries {
            self.max_retries.update(v, source);
        }
        if let Some(v) = file_config.base_retry_delay_ms {
            self.base_retry_delay_ms.update(v, source);
        }
        if let Some(v) = file_config.request_timeout_secs {
            self.request_timeout_secs.update(v, source);
        }
        if let Some(v) = file_config.scale_m {
            self.scale_m.update(v, source);
        }
        if let Some(v) = file_config.byte_limit {
            self.byte_limit.update(v, source);
        }
        if let Some(v) = file_config.bytes_per_band {
            self.bytes_per_band.update(v, source);
        }
        if let Some(v) = file_config.safety_margin {
            self.safety_margin.update(v, source);
        }
        if let Some(v) = file_config.exclude_pattern {
            self.exclude_pattern.update(v, source);
        }
        if let Some(v) = file_config.cleanup_files {
            self.cleanup_files.update(v, source);
        }
        if let Some(v) = file_config.max_replans {
            self.max_replans.update(v, source);
        }
        if let Some(v) = file_config.crs {
            self.crs.update(v, source);
        }
        if let Some(v) = file_config.expected_content_type {
            self.expected_content_type.update(v, source);
        }
        if let Some(v) = file_config.service_url {
            self.service_url.update(Some(v), source);
        }
        if let Some(v) = file_config.tile_dir {
            self.tile_dir.update(v, source);
        }

        Ok(self)
    }

    /// Load configuration from `GEOBATCH_*` environment variables
    pub fn load_from_env(mut self) -> Self {
        let source = ConfigSource::Environment;

        if let Some(v) = env_parse::<usize>("GEOBATCH_MAX_WORKERS") {
            self.max_workers.update(v, source);
        }
        if let Some(v) = env_parse::<usize>("GEOBATCH_MAX_EXTRACT_WORKERS") {
            self.max_extract_workers.update(v, source);
        }
        if let Some(v) = env_parse::<usize>("GEOBATCH_CHUNK_SIZE") {
            self.chunk_size.update(v, source);
        }
        if let Some(v) = env_parse::<u32>("GEOBATCH_MAX_RETRIES") {
            self.max_retries.update(v, source);
        }
        if let Some(v) = env_parse::<u64>("GEOBATCH_BASE_RETRY_DELAY_MS") {
            self.base_retry_delay_ms.update(v, source);
        }
        if let Some(v) = env_parse::<u64>("GEOBATCH_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs.update(v, source);
        }
        if let Some(v) = env_parse::<f64>("GEOBATCH_SCALE_M") {
            self.scale_m.update(v, source);
        }
        if let Some(v) = env_parse::<u64>("GEOBATCH_BYTE_LIMIT") {
            self.byte_limit.update(v, source);
        }
        if let Some(v) = env_parse::<u32>("GEOBATCH_BYTES_PER_BAND") {
            self.bytes_per_band.update(v, source);
        }
        if let Some(v) = env_parse::<f64>("GEOBATCH_SAFETY_MARGIN") {
            self.safety_margin.update(v, source);
        }
        if let Ok(v) = env::var("GEOBATCH_EXCLUDE_PATTERN") {
            self.exclude_pattern.update(v, source);
        }
        if let Some(v) = env_parse::<bool>("GEOBATCH_CLEANUP_FILES") {
            self.cleanup_files.update(v, source);
        }
        if let Some(v) = env_parse::<u32>("GEOBATCH_MAX_REPLANS") {
            self.max_replans.update(v, source);
        }
        if let Ok(v) = env::var("GEOBATCH_CRS") {
            if Crs::parse(&v).is_some() {
                self.crs.update(v, source);
            } else {
                tracing::warn!("Invalid GEOBATCH_CRS value '{}': expected EPSG:<code>", v);
            }
        }
        if let Ok(v) = env::var("GEOBATCH_SERVICE_URL") {
            self.service_url.update(Some(v), source);
        }
        if let Ok(v) = env::var("GEOBATCH_TILE_DIR") {
            self.tile_dir.update(PathBuf::from(v), source);
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        let source = ConfigSource::Cli;
        if let Some(v) = overrides.max_workers {
            self.max_workers.update(v, source);
        }
        if let Some(v) = overrides.max_extract_workers {
            self.max_extract_workers.update(v, source);
        }
        if let Some(v) = overrides.chunk_size {
            self.chunk_size.update(v, source);
        }
        if let Some(v) = overrides.max_retries {
            self.max_retries.update(v, source);
        }
        if let Some(v) = overrides.scale_m {
            self.scale_m.update(v, source);
        }
        if let Some(v) = overrides.safety_margin {
            self.safety_margin.update(v, source);
        }
        if let Some(v) = overrides.exclude_pattern {
            self.exclude_pattern.update(v, source);
        }
        if let Some(v) = overrides.cleanup_files {
            self.cleanup_files.update(v, source);
        }
        if let Some(v) = overrides.service_url {
            self.service_url.update(Some(v), source);
        }
        if let Some(v) = overrides.tile_dir {
            self.tile_dir.update(v, source);
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_workers", self.max_workers.value),
            ("max_extract_workers", self.max_extract_workers.value),
            ("chunk_size", self.chunk_size.value),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(GeobatchError::ConfigInvalid {
                    key: key.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if self.max_retries.value == 0 {
            return Err(GeobatchError::ConfigInvalid {
                key: "max_retries".to_string(),
                reason: "must allow at least one attempt".to_string(),
            });
        }

        if !(self.scale_m.value.is_finite() && self.scale_m.value > 0.0) {
            return Err(GeobatchError::ConfigInvalid {
                key: "scale_m".to_string(),
                reason: format!("must be a positive number, got {}", self.scale_m.value),
            });
        }

        let margin = self.safety_margin.value;
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(GeobatchError::ConfigInvalid {
                key: "safety_margin".to_string(),
                reason: format!("must be in (0, 1], got {}", margin),
            });
        }

        if self.bytes_per_band.value == 0 || self.byte_limit.value == 0 {
            return Err(GeobatchError::ConfigInvalid {
                key: "byte_limit".to_string(),
                reason: "byte_limit and bytes_per_band must be positive".to_string(),
            });
        }

        if let Err(e) = regex::Regex::new(&self.exclude_pattern.value) {
            return Err(GeobatchError::ConfigInvalid {
                key: "exclude_pattern".to_string(),
                reason: format!("not a valid regular expression: {}", e),
            });
        }

        if Crs::parse(&self.crs.value).is_none() {
            return Err(GeobatchError::ConfigInvalid {
                key: "crs".to_string(),
                reason: format!("expected EPSG:<code>, got {}", self.crs.value),
            });
        }

        Ok(())
    }

    /// Resolve to the plain values the engine consumes
    pub fn settings(&self) -> Result<EngineSettings> {
        self.validate()?;
        Ok(self.resolve())
    }

    fn resolve(&self) -> EngineSettings {
        EngineSettings {
            max_workers: self.max_workers.value,
            max_extract_workers: self.max_extract_workers.value,
            chunk_size: self.chunk_size.value,
            max_retries: self.max_retries.value,
            base_retry_delay: Duration::from_millis(self.base_retry_delay_ms.value),
            request_timeout: Duration::from_secs(self.request_timeout_secs.value),
            scale_m: self.scale_m.value,
            byte_limit: self.byte_limit.value,
            bytes_per_band: self.bytes_per_band.value,
            safety_margin: self.safety_margin.value,
            exclude_pattern: self.exclude_pattern.value.clone(),
            cleanup_files: self.cleanup_files.value,
            max_replans: self.max_replans.value,
            crs: Crs::parse(&self.crs.value).unwrap_or_default(),
            expected_content_type: self.expected_content_type.value.clone(),
            tile_dir: self.tile_dir.value.clone(),
        }
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        let mut map = HashMap::new();

        map.insert(
            "max_workers".to_string(),
            (self.max_workers.value.to_string(), self.max_workers.source),
        );
        map.insert(
            "max_extract_workers".to_string(),
            (self.max_extract_workers.value.to_string(), self.max_extract_workers.source),
        );
        map.insert(
            "chunk_size".to_string(),
            (self.chunk_size.value.to_string(), self.chunk_size.source),
        );
        map.insert(
            "max_retries".to_string(),
            (self.max_retries.value.to_string(), self.max_retries.source),
        );
        map.insert(
            "base_retry_delay".to_string(),
            (format!("{}ms", self.base_retry_delay_ms.value), self.base_retry_delay_ms.source),
        );
        map.insert(
            "request_timeout".to_string(),
            (format!("{}s", self.request_timeout_secs.value), self.request_timeout_secs.source),
        );
        map.insert(
            "scale_m".to_string(),
            (self.scale_m.value.to_string(), self.scale_m.source),
        );
        map.insert(
            "byte_limit".to_string(),
            (self.byte_limit.value.to_string(), self.byte_limit.source),
        );
        map.insert(
            "bytes_per_band".to_string(),
            (self.bytes_per_band.value.to_string(), self.bytes_per_band.source),
        );
        map.insert(
            "safety_margin".to_string(),
            (self.safety_margin.value.to_string(), self.safety_margin.source),
        );
        map.insert(
            "exclude_pattern".to_string(),
            (self.exclude_pattern.value.clone(), self.exclude_pattern.source),
        );
        map.insert(
            "cleanup_files".to_string(),
            (self.cleanup_files.value.to_string(), self.cleanup_files.source),
        );
        map.insert(
            "max_replans".to_string(),
            (self.max_replans.value.to_string(), self.max_replans.source),
        );
        map.insert("crs".to_string(), (self.crs.value.clone(), self.crs.source));
        map.insert(
            "expected_content_type".to_string(),
            (self.expected_content_type.value.clone(), self.expected_content_type.source),
        );
        map.insert(
            "service_url".to_string(),
            (
                self.service_url.value.clone().unwrap_or_else(|| "(unset)".to_string()),
                self.service_url.source,
            ),
        );
        map.insert(
            "tile_dir".to_string(),
            (self.tile_dir.value.display().to_string(), self.tile_dir.source),
        );

        map
    }
}

/// Resolved settings consumed by the batch engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_workers: usize,
    pub max_extract_workers: usize,
    pub chunk_size: usize,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub request_timeout: Duration,
    pub scale_m: f64,
    pub byte_limit: u64,
    pub bytes_per_band: u32,
    pub safety_margin: f64,
    pub exclude_pattern: String,
    pub cleanup_files: bool,
    pub max_replans: u32,
    pub crs: Crs,
    pub expected_content_type: String,
    pub tile_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        LayeredConfig::with_defaults().resolve()
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
struct FileConfig {
    max_workers: Option<usize>,
    max_extract_workers: Option<usize>,
    chunk_size: Option<usize>,
    max_retries: Option<u32>,
    base_retry_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    scale_m: Option<f64>,
    byte_limit: Option<u64>,
    bytes_per_band: Option<u32>,
    safety_margin: Option<f64>,
    exclude_pattern: Option<String>,
    cleanup_files: Option<bool>,
    max_replans: Option<u32>,
    crs: Option<String>,
    expected_content_type: Option<String>,
    service_url: Option<String>,
    tile_dir: Option<PathBuf>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub max_workers: Option<usize>,
    pub max_extract_workers: Option<usize>,
    pub chunk_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub scale_m: Option<f64>,
    pub safety_margin: Option<f64>,
    pub exclude_pattern: Option<String>,
    pub cleanup_files: Option<bool>,
    pub service_url: Option<String>,
    pub tile_dir: Option<PathBuf>,
}

/// Read and parse an environment variable, warning on unparsable values
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Invalid {} value '{}': ignoring", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LayeredConfig::with_defaults();
        assert_eq!(config.max_workers.value, 10);
        assert_eq!(config.max_workers.source, ConfigSource::Default);
        assert_eq!(config.chunk_size.value, 25);
        assert_eq!(config.byte_limit.value, 50_331_648);
        assert_eq!(config.exclude_pattern.value, "^decoy_");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_precedence() {
        let mut value = ConfigValue::new(100, ConfigSource::Default);

        // File should override default
        value.update(200, ConfigSource::File);
        assert_eq!(value.value, 200);
        assert_eq!(value.source, ConfigSource::File);

        // Environment should override file
        value.update(300, ConfigSource::Environment);
        assert_eq!(value.value, 300);

        // CLI should override environment
        value.update(400, ConfigSource::Cli);
        assert_eq!(value.value, 400);

        // Lower precedence should not override
        value.update(500, ConfigSource::File);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
max_workers = 4
chunk_size = 10
safety_margin = 0.8
exclude_pattern = "^fake_"
cleanup_files = true
service_url = "http://localhost:8080"
"#
        )
        .unwrap();

        let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

        assert_eq!(config.max_workers.value, 4);
        assert_eq!(config.max_workers.source, ConfigSource::File);
        assert_eq!(config.chunk_size.value, 10);
        assert_eq!(config.safety_margin.value, 0.8);
        assert_eq!(config.exclude_pattern.value, "^fake_");
        assert!(config.cleanup_files.value);
        assert_eq!(config.service_url.value.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.max_retries.source, ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = LayeredConfig::with_defaults();

        config.update_from_cli(CliConfigOverrides {
            max_workers: Some(2),
            scale_m: Some(30.0),
            ..Default::default()
        });

        assert_eq!(config.max_workers.value, 2);
        assert_eq!(config.max_workers.source, ConfigSource::Cli);
        assert_eq!(config.scale_m.value, 30.0);
        assert_eq!(config.chunk_size.source, ConfigSource::Default);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LayeredConfig::with_defaults();
        config.safety_margin.update(1.5, ConfigSource::Cli);
        assert!(config.validate().is_err());

        let mut config = LayeredConfig::with_defaults();
        config.chunk_size.update(0, ConfigSource::Cli);
        assert!(config.validate().is_err());

        let mut config = LayeredConfig::with_defaults();
        config.exclude_pattern.update("([".to_string(), ConfigSource::Cli);
        assert!(config.validate().is_err());

        let mut config = LayeredConfig::with_defaults();
        config.max_retries.update(0, ConfigSource::Cli);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_resolution() {
        let settings = LayeredConfig::with_defaults().settings().unwrap();
        assert_eq!(settings.base_retry_delay, Duration::from_millis(1000));
        assert_eq!(settings.request_timeout, Duration::from_secs(120));
        assert_eq!(settings.crs, Crs::wgs84());
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_inspection_map() {
        let config = LayeredConfig::with_defaults();
        let map = config.to_inspection_map();

        assert!(map.contains_key("max_workers"));
        assert!(map.contains_key("byte_limit"));
        assert!(map.contains_key("exclude_pattern"));

        let (margin, source) = &map["safety_margin"];
        assert_eq!(margin, "0.95");
        assert_eq!(*source, ConfigSource::Default);
        assert_eq!(map["service_url"].0, "(unset)");
    }
}
