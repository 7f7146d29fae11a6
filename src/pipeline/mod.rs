//! Pipeline stages: per-chunk processing, the two fan-in recombiners, and
//! final product assembly.

mod finalize;
mod metrics;
mod processor;
mod recombine;

#[cfg(test)]
mod scenario_tests;

pub use finalize::ProductFinalizer;
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use processor::{ChunkProcessor, ChunkResult};
pub use recombine::{CombinedResult, GeographicRecombiner, TemporalRecombiner};
