//! Task model and the persisted task record store.
//!
//! The [`AnalysisTask`] is the unit of work a user submits. Stages receive
//! an immutable snapshot of it plus a handle to the [`TaskStore`] for the
//! mutable fields: status, progress counters, output paths and metadata.
//! The progress counter is incremented by many concurrent chunk workers
//! and must be atomic at the store layer; everything else is written by
//! single-threaded stages sequenced by the pipeline itself.

use crate::analysis::ChunkMetadata;
use crate::cube::BoundingBox;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// How the analysis consumes the temporal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Compare a composite of each later period against a fixed anchor
    /// period (e.g. coastal change).
    Batch,

    /// Fold every scene into a running accumulator (e.g. water detection
    /// time series).
    Iterative,
}

/// Which animation product, if any, the task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationMode {
    /// No animation.
    None,

    /// One frame per scene showing that scene's raw result.
    PerScene,

    /// One frame per scene showing the accumulator after folding it.
    RunningState,
}

impl AnimationMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AnimationMode::None)
    }
}

/// User-visible task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Wait,
    Ok,
    Error,
}

/// Paths of the final deliverables, filled in by the finalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutputs {
    pub native_path: Option<String>,
    pub geotiff_path: Option<String>,
    pub preview_paths: Vec<String>,
    pub animation_path: Option<String>,
}

/// The unit of work submitted by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: Uuid,

    /// Spatial extent in WGS84 degrees.
    pub extent: BoundingBox,

    /// Temporal extent (inclusive start, inclusive end).
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,

    /// Platform / product selector passed through to the data source.
    pub platform: String,
    pub product: String,

    /// Measurement bands to load.
    pub measurements: Vec<String>,

    /// Registered analysis to run (see `analysis::registry`).
    pub analysis: String,

    /// Geographic cell size in degrees; `None` = single cell.
    pub geographic_chunk_size: Option<f64>,

    /// Scenes per temporal window (iterative mode).
    pub temporal_chunk_size: usize,

    /// Process windows most-recent-first (iterative mode).
    pub reverse_time: bool,

    pub processing_mode: ProcessingMode,
    pub animation_mode: AnimationMode,

    // Mutable fields below are written through the store; the copies here
    // reflect the snapshot taken when the task was fetched.
    pub status: TaskStatus,
    pub status_message: String,
    pub scenes_processed: u64,
    pub total_scenes: u64,
    pub outputs: TaskOutputs,
    pub metadata: ChunkMetadata,
    pub execution_start: Option<DateTime<Utc>>,
    pub execution_end: Option<DateTime<Utc>>,
    pub result_bounds: Option<BoundingBox>,
}

impl AnalysisTask {
    pub fn new(
        extent: BoundingBox,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
        platform: &str,
        product: &str,
        analysis: &str,
        processing_mode: ProcessingMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            extent,
            time_start,
            time_end,
            platform: platform.to_string(),
            product: product.to_string(),
            measurements: crate::source::DEFAULT_MEASUREMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analysis: analysis.to_string(),
            geographic_chunk_size: None,
            temporal_chunk_size: 1,
            reverse_time: false,
            processing_mode,
            animation_mode: AnimationMode::None,
            status: TaskStatus::Wait,
            status_message: String::new(),
            scenes_processed: 0,
            total_scenes: 0,
            outputs: TaskOutputs::default(),
            metadata: ChunkMetadata::default(),
            execution_start: None,
            execution_end: None,
            result_bounds: None,
        }
    }

    /// Scenes each temporal chunk contributes to the progress total.
    pub fn scenes_per_time_chunk(&self) -> usize {
        match self.processing_mode {
            ProcessingMode::Batch => 1,
            ProcessingMode::Iterative => self.temporal_chunk_size.max(1),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        use chrono::TimeZone;
        Self::new(
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2016, 12, 31, 0, 0, 0).unwrap(),
            "LANDSAT_8",
            "ls8_test",
            "water_detection",
            ProcessingMode::Iterative,
        )
    }
}

/// Key-addressed store for the mutable task record.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<AnalysisTask>;

    async fn insert(&self, task: AnalysisTask) -> Result<()>;

    async fn update_status(&self, id: Uuid, status: TaskStatus, message: &str) -> Result<()>;

    /// Fix the progress denominator once chunking completes.
    async fn set_total_scenes(&self, id: Uuid, total: u64) -> Result<()>;

    /// Atomically add to the progress counter, returning the new value.
    /// The counter only increases and never exceeds `total_scenes`.
    async fn increment_scenes_processed(&self, id: Uuid, amount: u64) -> Result<u64>;

    async fn set_outputs(&self, id: Uuid, outputs: TaskOutputs) -> Result<()>;

    async fn record_metadata(&self, id: Uuid, metadata: ChunkMetadata) -> Result<()>;

    async fn record_start(&self, id: Uuid) -> Result<()>;

    /// Terminal bookkeeping on the success path: completion timestamp and
    /// the bounds actually covered by the merged product.
    async fn record_completion(&self, id: Uuid, bounds: BoundingBox) -> Result<()>;
}

struct TaskSlot {
    task: RwLock<AnalysisTask>,
    /// Kept outside the RwLock so chunk workers increment without
    /// contending on the record itself.
    scenes_processed: AtomicU64,
    total_scenes: AtomicU64,
}

/// In-memory task store. Suitable for single-process deployments and
/// tests; a database-backed implementation only needs to honour the same
/// atomic-increment contract.
#[derive(Default)]
pub struct InMemoryTaskStore {
    slots: RwLock<HashMap<Uuid, Arc<TaskSlot>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Result<Arc<TaskSlot>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(PipelineError::TaskNotFound(id))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, id: Uuid) -> Result<AnalysisTask> {
        let slot = self.slot(id)?;
        let mut task = slot.task.read().unwrap_or_else(|e| e.into_inner()).clone();
        task.scenes_processed = slot.scenes_processed.load(Ordering::SeqCst);
        task.total_scenes = slot.total_scenes.load(Ordering::SeqCst);
        Ok(task)
    }

    async fn insert(&self, task: AnalysisTask) -> Result<()> {
        let id = task.id;
        let slot = Arc::new(TaskSlot {
            scenes_processed: AtomicU64::new(task.scenes_processed),
            total_scenes: AtomicU64::new(task.total_scenes),
            task: RwLock::new(task),
        });
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, slot);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus, message: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut task = slot.task.write().unwrap_or_else(|e| e.into_inner());
        task.status = status;
        task.status_message = message.to_string();
        tracing::debug!(task = %id, ?status, message, "status updated");
        Ok(())
    }

    async fn set_total_scenes(&self, id: Uuid, total: u64) -> Result<()> {
        let slot = self.slot(id)?;
        slot.total_scenes.store(total, Ordering::SeqCst);
        slot.scenes_processed.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn increment_scenes_processed(&self, id: Uuid, amount: u64) -> Result<u64> {
        let slot = self.slot(id)?;
        let total = slot.total_scenes.load(Ordering::SeqCst);
        let mut current = slot.scenes_processed.load(Ordering::SeqCst);
        // CAS loop so the clamp at total_scenes holds under contention.
        loop {
            let next = (current + amount).min(total);
            match slot.scenes_processed.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }

    async fn set_outputs(&self, id: Uuid, outputs: TaskOutputs) -> Result<()> {
        let slot = self.slot(id)?;
        slot.task.write().unwrap_or_else(|e| e.into_inner()).outputs = outputs;
        Ok(())
    }

    async fn record_metadata(&self, id: Uuid, metadata: ChunkMetadata) -> Result<()> {
        let slot = self.slot(id)?;
        slot.task.write().unwrap_or_else(|e| e.into_inner()).metadata = metadata;
        Ok(())
    }

    async fn record_start(&self, id: Uuid) -> Result<()> {
        let slot = self.slot(id)?;
        slot.task
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .execution_start = Some(Utc::now());
        Ok(())
    }

    async fn record_completion(&self, id: Uuid, bounds: BoundingBox) -> Result<()> {
        let slot = self.slot(id)?;
        let mut task = slot.task.write().unwrap_or_else(|e| e.into_inner());
        task.execution_end = Some(Utc::now());
        task.result_bounds = Some(bounds);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryTaskStore::new();
        let task = AnalysisTask::for_tests();
        let id = task.id;

        store.insert(task).await.unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, TaskStatus::Wait);
    }

    #[tokio::test]
    async fn test_get_unknown_task_is_error() {
        let store = InMemoryTaskStore::new();
        assert!(store.get(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_increment_is_clamped_to_total() {
        let store = InMemoryTaskStore::new();
        let task = AnalysisTask::for_tests();
        let id = task.id;
        store.insert(task).await.unwrap();
        store.set_total_scenes(id, 3).await.unwrap();

        assert_eq!(store.increment_scenes_processed(id, 2).await.unwrap(), 2);
        assert_eq!(store.increment_scenes_processed(id, 2).await.unwrap(), 3);
        // Duplicate delivery never pushes past the denominator.
        assert_eq!(store.increment_scenes_processed(id, 1).await.unwrap(), 3);

        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.scenes_processed, 3);
        assert_eq!(fetched.total_scenes, 3);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = AnalysisTask::for_tests();
        let id = task.id;
        store.insert(task).await.unwrap();
        store.set_total_scenes(id, 1000).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment_scenes_processed(id, 1).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.get(id).await.unwrap().scenes_processed, 1000);
    }

    #[tokio::test]
    async fn test_status_transition() {
        let store = InMemoryTaskStore::new();
        let task = AnalysisTask::for_tests();
        let id = task.id;
        store.insert(task).await.unwrap();

        store
            .update_status(id, TaskStatus::Error, "no acquisitions")
            .await
            .unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Error);
        assert_eq!(fetched.status_message, "no acquisitions");
    }
}
