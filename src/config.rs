//! Configuration for the chunked analysis pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage roots for temporary and result artifacts
    #[serde(default)]
    pub storage: StorageConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Output rendering configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Storage roots. Each task gets its own subdirectory of both, so
/// concurrent tasks never share a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for per-task temporary chunk artifacts
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,

    /// Root for per-task final products
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            results_root: default_results_root(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent geographic chunk workers within one time chunk
    #[serde(default = "default_geo_concurrency")]
    pub geo_concurrency: usize,

    /// Concurrent time-chunk groups
    #[serde(default = "default_time_concurrency")]
    pub time_concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for CPU-bound stitching
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Enable periodic metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Retry configuration for transient chunk failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional path to save metrics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            geo_concurrency: default_geo_concurrency(),
            time_concurrency: default_time_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            retry: RetryConfig::default(),
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient failures. Stands in for queue
/// redelivery when running single-process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per chunk
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Output rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Lower bound of the reflectance range scaled into RGB previews
    #[serde(default)]
    pub preview_min: f64,

    /// Upper bound of the reflectance range scaled into RGB previews
    #[serde(default = "default_preview_max")]
    pub preview_max: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            preview_min: 0.0,
            preview_max: default_preview_max(),
        }
    }
}

impl OutputConfig {
    pub fn preview_range(&self) -> (f64, f64) {
        (self.preview_min, self.preview_max)
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.geo_concurrency == 0 {
            anyhow::bail!("geo_concurrency must be > 0");
        }
        if self.processing.time_concurrency == 0 {
            anyhow::bail!("time_concurrency must be > 0");
        }
        if self.processing.retry.max_retries == 0 {
            anyhow::bail!("max_retries must be > 0");
        }
        if self.output.preview_max <= self.output.preview_min {
            anyhow::bail!("preview_max must be greater than preview_min");
        }
        if self.storage.temp_root == self.storage.results_root {
            anyhow::bail!("temp_root and results_root must differ");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_temp_root() -> PathBuf {
    PathBuf::from("/tmp/datacube-pipeline/temp")
}
fn default_results_root() -> PathBuf {
    PathBuf::from("/tmp/datacube-pipeline/results")
}
fn default_geo_concurrency() -> usize {
    8
}
fn default_time_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_metrics_interval() -> u64 {
    10
}
fn default_max_retries() -> usize {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    10000
}
fn default_preview_max() -> f64 {
    4096.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.geo_concurrency, 8);
        assert_eq!(config.output.preview_range(), (0.0, 4096.0));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = Config::from_yaml(
            r#"
processing:
  geo_concurrency: 2
"#,
        )
        .unwrap();
        assert_eq!(config.processing.geo_concurrency, 2);
        assert_eq!(config.processing.time_concurrency, 4);
        assert_eq!(config.processing.retry.max_retries, 3);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.processing.geo_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_preview_range() {
        let mut config = Config::default();
        config.output.preview_min = 100.0;
        config.output.preview_max = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_shared_roots() {
        let mut config = Config::default();
        config.storage.results_root = config.storage.temp_root.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let restored = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            restored.processing.geo_concurrency,
            config.processing.geo_concurrency
        );
    }
}
