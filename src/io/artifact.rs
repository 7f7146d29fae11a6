//! Per-task temporary artifact storage.
//!
//! Every intermediate product is a [`RasterSlab`] serialized with bincode
//! under a name derived deterministically from its chunk identity, so
//! re-execution of the same chunk overwrites the same file with the same
//! bytes. Temporary storage is scoped per task id; concurrent tasks never
//! share a directory.

use crate::cube::RasterSlab;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Storage handle for one task's temporary and result directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    temp_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    /// Create (or reuse) the task-scoped directories under the configured
    /// roots.
    pub fn create(temp_root: &Path, results_root: &Path, task_id: Uuid) -> Result<Self> {
        let temp_dir = temp_root.join(task_id.to_string());
        let results_dir = results_root.join(task_id.to_string());
        fs::create_dir_all(&temp_dir)?;
        fs::create_dir_all(&results_dir)?;
        Ok(Self {
            temp_dir,
            results_dir,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Artifact for one (geographic, temporal) unit.
    pub fn chunk_path(&self, geo_chunk: usize, time_chunk: usize) -> PathBuf {
        self.temp_dir
            .join(format!("chunk_{}_{}.bin", geo_chunk, time_chunk))
    }

    /// Geographically recombined mosaic for one time chunk.
    pub fn recombined_geo_path(&self, time_chunk: usize) -> PathBuf {
        self.temp_dir
            .join(format!("recombined_geo_{}.bin", time_chunk))
    }

    /// Final temporally recombined product.
    pub fn recombined_time_path(&self) -> PathBuf {
        self.temp_dir.join("recombined_time.bin")
    }

    /// Per-geo-chunk animation step artifact.
    pub fn animation_step_geo_path(&self, geo_chunk: usize, step: usize) -> PathBuf {
        self.temp_dir
            .join(format!("animation_{}_{}.bin", geo_chunk, step))
    }

    /// Geographically combined animation step artifact.
    pub fn animation_step_path(&self, step: usize) -> PathBuf {
        self.temp_dir.join(format!("animation_{}.bin", step))
    }

    /// Rendered animation frame.
    pub fn animation_frame_path(&self, step: usize) -> PathBuf {
        self.temp_dir.join(format!("animation_{}.png", step))
    }

    /// Serialize a slab to a deterministic path.
    pub fn write_slab(&self, path: &Path, slab: &RasterSlab) -> Result<()> {
        let bytes = bincode::serialize(slab)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_slab(&self, path: &Path) -> Result<RasterSlab> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Drop the task's temporary directory. Results are untouched.
    pub fn remove_temp(&self) -> Result<()> {
        if self.temp_dir.exists() {
            fs::remove_dir_all(&self.temp_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::BoundingBox;
    use ndarray::Array2;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn slab() -> RasterSlab {
        let mut bands = BTreeMap::new();
        bands.insert("v".to_string(), Array2::from_elem((2, 2), 7.5));
        RasterSlab {
            bands,
            bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            resolution: 0.5,
        }
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store =
            ArtifactStore::create(tmp.path(), &tmp.path().join("results"), Uuid::new_v4()).unwrap();

        let original = slab();
        let path = store.chunk_path(0, 1);
        store.write_slab(&path, &original).unwrap();

        let restored = store.read_slab(&path).unwrap();
        assert_eq!(restored.band("v").unwrap(), original.band("v").unwrap());
        assert_eq!(restored.bounds, original.bounds);
    }

    #[test]
    fn test_paths_are_deterministic() {
        let tmp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = ArtifactStore::create(tmp.path(), tmp.path(), id).unwrap();

        assert_eq!(store.chunk_path(3, 5), store.chunk_path(3, 5));
        assert!(store
            .chunk_path(3, 5)
            .to_string_lossy()
            .contains("chunk_3_5.bin"));
        assert_ne!(store.chunk_path(3, 5), store.chunk_path(5, 3));
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::create(tmp.path(), tmp.path(), Uuid::new_v4()).unwrap();
        let path = store.chunk_path(0, 0);

        store.write_slab(&path, &slab()).unwrap();
        let first = fs::read(&path).unwrap();
        store.write_slab(&path, &slab()).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_remove_temp_keeps_results() {
        let tmp = TempDir::new().unwrap();
        let store =
            ArtifactStore::create(&tmp.path().join("t"), &tmp.path().join("r"), Uuid::new_v4())
                .unwrap();

        store.write_slab(&store.chunk_path(0, 0), &slab()).unwrap();
        store.remove_temp().unwrap();
        assert!(!store.temp_dir().exists());
        assert!(store.results_dir().exists());
    }
}
