//! Chunk planning: split a spatiotemporal query into independent units.

mod geographic;
mod temporal;

pub use geographic::create_geographic_chunks;
pub use temporal::{create_time_windows, group_dates_by_year, pair_years_against_anchor};

use crate::cube::BoundingBox;
use crate::error::{PipelineError, Result};
use crate::task::{AnalysisTask, ProcessingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sub-extent of the task's bounding box, indexed in row-major grid
/// order. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicChunk {
    pub index: usize,
    pub bounds: BoundingBox,
}

/// A group of acquisition dates, indexed in chronological order.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemporalChunk {
    /// Batch mode: the anchor period's dates paired with one comparison
    /// period's dates.
    Pair {
        index: usize,
        anchor: Vec<DateTime<Utc>>,
        comparison: Vec<DateTime<Utc>>,
    },

    /// Iterative mode: a contiguous window of acquisition dates, each
    /// processed as one step.
    Window {
        index: usize,
        dates: Vec<DateTime<Utc>>,
    },
}

impl TemporalChunk {
    pub fn index(&self) -> usize {
        match self {
            TemporalChunk::Pair { index, .. } => *index,
            TemporalChunk::Window { index, .. } => *index,
        }
    }

    /// Number of processing steps this chunk contributes.
    pub fn num_steps(&self) -> usize {
        match self {
            TemporalChunk::Pair { .. } => 1,
            TemporalChunk::Window { dates, .. } => dates.len(),
        }
    }
}

/// The full decomposition of one task.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub geographic: Vec<GeographicChunk>,
    pub temporal: Vec<TemporalChunk>,
}

impl ChunkPlan {
    /// Scenes accounted for in progress reporting:
    /// geo x time x scenes-per-time-chunk.
    pub fn total_scenes(&self, scenes_per_time_chunk: usize) -> u64 {
        (self.geographic.len() * self.temporal.len() * scenes_per_time_chunk) as u64
    }
}

/// Build the chunk plan for a task from its acquisition dates.
///
/// Batch mode groups dates by calendar year and pairs every year after
/// the first against it; iterative mode cuts the date list into windows
/// of the configured size. An empty plan is an error, surfaced before any
/// fan-out happens.
pub fn plan_chunks(task: &AnalysisTask, dates: &[DateTime<Utc>]) -> Result<ChunkPlan> {
    let geographic = create_geographic_chunks(task.extent, task.geographic_chunk_size);

    let temporal = match task.processing_mode {
        ProcessingMode::Batch => {
            let by_year = group_dates_by_year(dates);
            pair_years_against_anchor(&by_year)?
        }
        ProcessingMode::Iterative => {
            create_time_windows(dates, task.temporal_chunk_size, task.reverse_time)
        }
    };

    if temporal.is_empty() {
        return Err(PipelineError::Validation(
            "no temporal chunks could be formed from the available acquisitions".to_string(),
        ));
    }

    tracing::info!(
        "Chunk plan: {} geographic x {} temporal",
        geographic.len(),
        temporal.len()
    );

    Ok(ChunkPlan {
        geographic,
        temporal,
    })
}
