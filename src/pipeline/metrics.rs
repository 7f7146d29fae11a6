//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one pipeline run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of chunk units processed to completion
    pub chunks_processed: AtomicU64,

    /// Number of chunk units skipped (no data)
    pub chunks_skipped: AtomicU64,

    /// Number of scenes fetched and analyzed
    pub scenes_analyzed: AtomicU64,

    /// Number of failed operations
    pub failures: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-component timing (in microseconds for precision)
    /// Time spent fetching source data (microseconds)
    pub fetch_us: AtomicU64,

    /// Time spent in analysis functions (microseconds)
    pub analysis_us: AtomicU64,

    /// Time spent recombining (microseconds)
    pub combine_us: AtomicU64,

    /// Time spent writing artifacts and products (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a processed chunk unit.
    pub fn add_chunk_processed(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped chunk unit.
    pub fn add_chunk_skipped(&self) {
        self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record analyzed scenes.
    pub fn add_scenes_analyzed(&self, count: u64) {
        self.scenes_analyzed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a failure.
    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent fetching source data.
    pub fn add_fetch_time(&self, duration: Duration) {
        self.fetch_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in analysis functions.
    pub fn add_analysis_time(&self, duration: Duration) {
        self.analysis_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent recombining.
    pub fn add_combine_time(&self, duration: Duration) {
        self.combine_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent writing artifacts and products.
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get chunk units per second.
    pub fn chunks_per_second(&self) -> f64 {
        let chunks = self.chunks_processed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            chunks as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            scenes_analyzed: self.scenes_analyzed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            chunks_per_second: self.chunks_per_second(),
            fetch_secs: self.fetch_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            analysis_secs: self.analysis_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            combine_secs: self.combine_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub chunks_processed: u64,
    pub chunks_skipped: u64,
    pub scenes_analyzed: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub chunks_per_second: f64,
    /// Total time spent fetching (seconds, summed across workers)
    pub fetch_secs: f64,
    /// Total time spent in analysis (seconds, summed across workers)
    pub analysis_secs: f64,
    /// Total time spent recombining (seconds)
    pub combine_secs: f64,
    /// Total time spent writing (seconds, summed across workers)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.fetch_secs + self.analysis_secs + self.combine_secs + self.write_secs;
        let (fetch_pct, analysis_pct, combine_pct, write_pct) = if total > 0.0 {
            (
                self.fetch_secs / total * 100.0,
                self.analysis_secs / total * 100.0,
                self.combine_secs / total * 100.0,
                self.write_secs / total * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Chunks: {} processed, {} skipped | Scenes: {} | \
             Rate: {:.1} chunks/s | Failures: {} | Elapsed: {:.1}s | \
             Time: fetch {:.0}% | analysis {:.0}% | combine {:.0}% | write {:.0}%",
            self.chunks_processed,
            self.chunks_skipped,
            self.scenes_analyzed,
            self.chunks_per_second,
            self.failures,
            self.elapsed.as_secs_f64(),
            fetch_pct,
            analysis_pct,
            combine_pct,
            write_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_chunks: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_chunks: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_chunks,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_chunks > 0 {
                        (snapshot.chunks_processed + snapshot.chunks_skipped) as f64
                            / self.total_chunks as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }
}
