//! Datacube Analysis Pipeline CLI
//!
//! Runs a task described in a YAML file against the built-in synthetic
//! data source. Production deployments embed the library behind their own
//! task queue and data cube service instead.

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use datacube_pipeline::cube::BoundingBox;
use datacube_pipeline::source::SyntheticSource;
use datacube_pipeline::task::{
    AnalysisTask, AnimationMode, InMemoryTaskStore, ProcessingMode, TaskStore,
};
use datacube_pipeline::{build_runtime, init_rayon, run_task, Config, PipelineContext};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "datacube-pipeline")]
#[command(about = "Chunked map-reduce pipeline for satellite imagery analyses", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task described in a YAML file
    Run {
        /// Path to the task description
        #[arg(short, long)]
        task: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration and task file
    GenerateConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

/// Task description as parsed from the task YAML file.
#[derive(Debug, Deserialize)]
struct TaskSpec {
    /// [min_lon, min_lat, max_lon, max_lat]
    extent: [f64; 4],
    time_start: NaiveDate,
    time_end: NaiveDate,
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default = "default_product")]
    product: String,
    analysis: String,
    mode: ProcessingMode,
    #[serde(default = "default_animation")]
    animation: AnimationMode,
    #[serde(default)]
    geographic_chunk_size: Option<f64>,
    #[serde(default = "default_temporal_chunk_size")]
    temporal_chunk_size: usize,
    #[serde(default)]
    reverse_time: bool,
    #[serde(default)]
    measurements: Option<Vec<String>>,
    /// Pixel size of the synthetic source, in degrees
    #[serde(default = "default_resolution")]
    resolution: f64,
}

fn default_platform() -> String {
    "LANDSAT_8".to_string()
}
fn default_product() -> String {
    "ls8_demo".to_string()
}
fn default_animation() -> AnimationMode {
    AnimationMode::None
}
fn default_temporal_chunk_size() -> usize {
    1
}
fn default_resolution() -> f64 {
    0.05
}

impl TaskSpec {
    fn into_task(self) -> AnalysisTask {
        let [min_x, min_y, max_x, max_y] = self.extent;
        let start = Utc.from_utc_datetime(&self.time_start.and_time(chrono::NaiveTime::MIN));
        // Inclusive end date: extend to the last second of the day.
        let end = Utc.from_utc_datetime(&self.time_end.and_time(chrono::NaiveTime::MIN))
            + chrono::Duration::days(1)
            - chrono::Duration::seconds(1);

        let mut task = AnalysisTask::new(
            BoundingBox::new(min_x, min_y, max_x, max_y),
            start,
            end,
            &self.platform,
            &self.product,
            &self.analysis,
            self.mode,
        );
        task.animation_mode = self.animation;
        task.geographic_chunk_size = self.geographic_chunk_size;
        task.temporal_chunk_size = self.temporal_chunk_size;
        task.reverse_time = self.reverse_time;
        if let Some(measurements) = self.measurements {
            task.measurements = measurements;
        }
        task
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { task } => run_command(cli.config, task),
        Commands::Validate => validate_command(cli.config),
        Commands::GenerateConfig { output } => generate_config_command(output),
    }
}

fn run_command(config_path: PathBuf, task_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path).unwrap_or_else(|_| {
        tracing::info!("no configuration file found, using defaults");
        Config::default()
    });
    config.validate()?;

    let spec: TaskSpec = serde_yaml::from_str(
        &std::fs::read_to_string(&task_path)
            .with_context(|| format!("cannot read task file {}", task_path.display()))?,
    )?;
    let resolution = spec.resolution;
    let task = spec.into_task();
    let task_id = task.id;

    init_rayon(config.processing.rayon_threads)?;
    let runtime = build_runtime(config.processing.worker_threads)?;

    runtime.block_on(async {
        let store = Arc::new(InMemoryTaskStore::new());
        store.insert(task).await?;

        let ctx = PipelineContext {
            config: Arc::new(config),
            store: store.clone(),
            source: Arc::new(SyntheticSource::new(resolution)),
        };

        let ok = run_task(task_id, &ctx).await?;
        let finished = store.get(task_id).await?;

        println!("\n=== Task {} ===", task_id);
        println!("Status: {:?} - {}", finished.status, finished.status_message);
        println!(
            "Scenes: {}/{}",
            finished.scenes_processed, finished.total_scenes
        );
        if let Some(path) = &finished.outputs.native_path {
            println!("Native output: {}", path);
        }
        if let Some(path) = &finished.outputs.geotiff_path {
            println!("GeoTIFF: {}", path);
        }
        for path in &finished.outputs.preview_paths {
            println!("Preview: {}", path);
        }
        if let Some(path) = &finished.outputs.animation_path {
            println!("Animation: {}", path);
        }

        if ok {
            Ok(())
        } else {
            anyhow::bail!("task ended in ERROR state")
        }
    })
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Datacube Analysis Pipeline Configuration

# === STORAGE: per-task artifact roots ===
storage:
  # Temporary chunk artifacts (deleted on task completion)
  temp_root: "/tmp/datacube-pipeline/temp"

  # Final products
  results_root: "/tmp/datacube-pipeline/results"

# === PROCESSING: concurrency and retries ===
processing:
  # Concurrent geographic chunk workers within one time chunk
  geo_concurrency: 8

  # Concurrent time-chunk groups
  time_concurrency: 4

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 16

  # Rayon thread pool size for CPU-bound stitching (null = num CPUs)
  # rayon_threads: 16

  # Print throughput metrics during processing
  enable_metrics: true
  metrics_interval_secs: 10

  # Retry configuration for transient chunk failures
  retry:
    max_retries: 3
    initial_backoff_ms: 100
    max_backoff_ms: 10000

# === OUTPUT: preview rendering ===
output:
  # Reflectance range scaled into RGB previews
  preview_min: 0.0
  preview_max: 4096.0
"#;
    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    let task_yaml = r#"# Sample task: surface-water time series with a running-state animation
extent: [0.0, 0.0, 1.0, 1.0]
time_start: 2015-01-01
time_end: 2015-06-30
analysis: water_detection
mode: iterative
animation: running_state
geographic_chunk_size: 0.5
temporal_chunk_size: 2
resolution: 0.05
"#;
    let task_path = output.with_file_name("task.yaml");
    std::fs::write(&task_path, task_yaml)?;
    println!("Generated sample task at: {}", task_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["datacube-pipeline", "run", "--task", "task.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["datacube-pipeline", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_task_spec_parses() {
        let spec: TaskSpec = serde_yaml::from_str(
            r#"
extent: [0.0, 0.0, 2.0, 1.0]
time_start: 2014-01-01
time_end: 2016-12-31
analysis: coastal_change
mode: batch
animation: per_scene
"#,
        )
        .unwrap();
        assert_eq!(spec.mode, ProcessingMode::Batch);
        assert_eq!(spec.animation, AnimationMode::PerScene);

        let task = spec.into_task();
        assert_eq!(task.extent.max_x, 2.0);
        assert_eq!(task.temporal_chunk_size, 1);
        assert!(!task.measurements.is_empty());
    }
}
