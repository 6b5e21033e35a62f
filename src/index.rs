//! Exhaustive cosine-similarity vector index.
//!
//! Vectors are L2-normalized once at build time and stored row-major in a
//! single `Vec<f32>`. A query is normalized the same way and scored against
//! every row by inner product, so scores are cosine similarities in
//! `[-1.0, 1.0]`. The index never thresholds or filters by score.
//!
//! Row ids are dense and contiguous from 0 in build order. An index is
//! immutable once built; a rebuild produces a new [`VectorIndex`] that
//! replaces the old one through an [`IndexHandle`].
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/vectors.bin     "RAGV" | u32 version | u32 dims | u64 rows | rows*dims f32   (all LE)
//! <dir>/metadata.json   { format_version, model, dims, rows, built_at, entries: [...] }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IndexBuildError, IndexUnavailableError};

const MAGIC: &[u8; 4] = b"RAGV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

/// Guard against dividing by a zero norm.
pub const NORM_EPSILON: f32 = 1e-12;

/// Metadata stored alongside each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub document_id: String,
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    format_version: u32,
    model: String,
    dims: usize,
    rows: usize,
    built_at: DateTime<Utc>,
    entries: Vec<ChunkMeta>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    model: String,
    built_at: DateTime<Utc>,
    vectors: Vec<f32>,
    entries: Vec<ChunkMeta>,
}

/// Scale `v` to unit length in place. Zero vectors stay zero.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPSILON);
    for x in v.iter_mut() {
        *x /= denom;
    }
}

impl VectorIndex {
    pub fn build(
        model: impl Into<String>,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMeta>,
    ) -> Result<Self, IndexBuildError> {
        if vectors.is_empty() {
            return Err(IndexBuildError::EmptyCorpus);
        }
        if vectors.len() != metadata.len() {
            return Err(IndexBuildError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }

        let dims = vectors[0].len();
        if dims == 0 {
            return Err(IndexBuildError::ZeroDimension);
        }

        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for (row, mut v) in vectors.into_iter().enumerate() {
            if v.len() != dims {
                return Err(IndexBuildError::DimensionMismatch {
                    row,
                    expected: dims,
                    found: v.len(),
                });
            }
            normalize(&mut v);
            flat.extend_from_slice(&v);
        }

        Ok(Self {
            dims,
            model: model.into(),
            built_at: Utc::now(),
            vectors: flat,
            entries: metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn entry(&self, row: usize) -> Option<&ChunkMeta> {
        self.entries.get(row)
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dims..(row + 1) * self.dims]
    }

    /// Top `min(k, len)` rows by cosine similarity, best first. Equal scores
    /// are ordered by row id. The caller must pass a vector of
    /// [`dims`](Self::dims) length.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || query.len() != self.dims {
            return Vec::new();
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|row| {
                let score = self
                    .row(row)
                    .iter()
                    .zip(q.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (row, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// Persist into `dir`, replacing whatever is there only once the new
    /// files are completely written.
    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        let parent = dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        let staging = parent.join(format!(".{}.staging-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging)?;

        if let Err(e) = self.write_files(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let retired: Option<PathBuf> = if dir.exists() {
            let old = parent.join(format!(".{}.old-{}", name, uuid::Uuid::new_v4()));
            fs::rename(dir, &old)?;
            Some(old)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staging, dir) {
            if let Some(old) = &retired {
                let _ = fs::rename(old, dir);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if let Some(old) = retired {
            if let Err(e) = fs::remove_dir_all(&old) {
                warn!(path = %old.display(), error = %e, "failed to remove previous index");
            }
        }

        info!(path = %dir.display(), rows = self.len(), dims = self.dims, "index saved");
        Ok(())
    }

    fn write_files(&self, dir: &Path) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for v in &self.vectors {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let mut f = fs::File::create(dir.join(VECTORS_FILE))?;
        f.write_all(&bytes)?;
        f.sync_all()?;

        let meta = MetadataFile {
            format_version: FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            rows: self.len(),
            built_at: self.built_at,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec(&meta).map_err(std::io::Error::other)?;
        let mut f = fs::File::create(dir.join(METADATA_FILE))?;
        f.write_all(&json)?;
        f.sync_all()?;
        Ok(())
    }

    /// Load a persisted index that the given embedder can query: the
    /// recorded model must be `model`, and the dimension must match `dims`
    /// when known.
    pub fn load_for(
        dir: &Path,
        model: &str,
        dims: Option<usize>,
    ) -> Result<Self, IndexUnavailableError> {
        let index = Self::load(dir, dims)?;
        if index.model != model {
            return Err(IndexUnavailableError::ModelMismatch {
                expected: model.to_string(),
                found: index.model,
            });
        }
        Ok(index)
    }

    /// Load a persisted index. When `expected_dims` is set the stored
    /// dimension must match it.
    pub fn load(dir: &Path, expected_dims: Option<usize>) -> Result<Self, IndexUnavailableError> {
        let vectors_path = dir.join(VECTORS_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        if !vectors_path.exists() || !metadata_path.exists() {
            return Err(IndexUnavailableError::Missing(dir.to_path_buf()));
        }

        let bytes = fs::read(&vectors_path)?;
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(IndexUnavailableError::Corrupt(
                "vectors.bin has no valid header".to_string(),
            ));
        }

        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(IndexUnavailableError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dims = read_u32(&bytes[8..12]) as usize;
        let rows = read_u64(&bytes[12..20]) as usize;

        if dims == 0 {
            return Err(IndexUnavailableError::Corrupt("zero dimension".to_string()));
        }
        if let Some(expected) = expected_dims {
            if expected != dims {
                return Err(IndexUnavailableError::DimensionMismatch {
                    expected,
                    found: dims,
                });
            }
        }

        let body = &bytes[HEADER_LEN..];
        let expected_len = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexUnavailableError::Corrupt("header overflow".to_string()))?;
        if body.len() != expected_len {
            return Err(IndexUnavailableError::Corrupt(format!(
                "vectors.bin holds {} bytes, header promises {}",
                body.len(),
                expected_len
            )));
        }
        let vectors: Vec<f32> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let meta: MetadataFile = serde_json::from_slice(&fs::read(&metadata_path)?)
            .map_err(|e| IndexUnavailableError::Corrupt(format!("metadata.json: {}", e)))?;

        if meta.dims != dims {
            return Err(IndexUnavailableError::DimensionMismatch {
                expected: meta.dims,
                found: dims,
            });
        }
        if meta.rows != rows || meta.entries.len() != rows {
            return Err(IndexUnavailableError::Corrupt(format!(
                "row count mismatch: vectors.bin has {}, metadata has {} ({} entries)",
                rows,
                meta.rows,
                meta.entries.len()
            )));
        }

        debug!(path = %dir.display(), rows, dims, "index loaded");
        Ok(Self {
            dims,
            model: meta.model,
            built_at: meta.built_at,
            vectors,
            entries: meta.entries,
        })
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[..8]);
    u64::from_le_bytes(buf)
}

/// The queryable index reference shared by every reader and the rebuild
/// path.
///
/// Readers take a cloned `Arc` under a short read lock and search without
/// holding any lock, so an in-flight query keeps the index it started with
/// while a rebuild swaps in a new one.
#[derive(Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl IndexHandle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_index(index: VectorIndex) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(index))),
        }
    }

    /// Load the persisted index, or start empty when there is none, it
    /// cannot be read, or it was built by a different model.
    pub fn load_or_empty(dir: &Path, model: &str, dims: Option<usize>) -> Self {
        match VectorIndex::load_for(dir, model, dims) {
            Ok(index) => {
                info!(rows = index.len(), dims = index.dims(), "loaded persisted index");
                Self::with_index(index)
            }
            Err(IndexUnavailableError::Missing(_)) => {
                info!(path = %dir.display(), "no persisted index yet");
                Self::empty()
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "persisted index unavailable, starting empty");
                Self::empty()
            }
        }
    }

    pub fn current(&self) -> Option<Arc<VectorIndex>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a freshly built index, returning the previous one.
    pub fn replace(&self, index: Arc<VectorIndex>) -> Option<Arc<VectorIndex>> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(i: usize) -> ChunkMeta {
        ChunkMeta {
            document_id: format!("doc{}.pdf", i % 2),
            page: i as u32 + 1,
            text: format!("chunk {}", i),
        }
    }

    fn sample_index() -> VectorIndex {
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.0],
            vec![0.0, 0.0, -1.0],
            vec![0.0, 0.0, 0.0],
        ];
        let metadata = (0..vectors.len()).map(meta).collect();
        VectorIndex::build("test-model", vectors, metadata).unwrap()
    }

    #[test]
    fn build_rejects_empty_input() {
        let err = VectorIndex::build("m", vec![], vec![]).unwrap_err();
        assert_eq!(err, IndexBuildError::EmptyCorpus);
    }

    #[test]
    fn build_rejects_ragged_vectors() {
        let err =
            VectorIndex::build("m", vec![vec![1.0, 2.0], vec![1.0]], vec![meta(0), meta(1)])
                .unwrap_err();
        assert!(matches!(err, IndexBuildError::DimensionMismatch { row: 1, .. }));
    }

    #[test]
    fn build_rejects_metadata_mismatch() {
        let err = VectorIndex::build("m", vec![vec![1.0]], vec![]).unwrap_err();
        assert!(matches!(err, IndexBuildError::LengthMismatch { .. }));
    }

    #[test]
    fn normalize_guards_zero_vector() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);

        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn search_orders_best_first_and_limits() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.1, 0.0], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 2);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));

        assert_eq!(index.search(&[1.0, 0.0, 0.0], 100).len(), index.len());
        assert!(index.search(&[1.0, 0.0, 0.0], 0).is_empty());
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn self_similarity_is_maximal() {
        let index = sample_index();
        for (row, v) in [
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.0],
            vec![0.0, 0.0, -1.0],
        ]
        .iter()
        .enumerate()
        {
            let hits = index.search(v, 1);
            assert_eq!(hits[0].0, row);
            assert!((hits[0].1 - 1.0).abs() < 1e-6, "row {} score {}", row, hits[0].1);
        }
    }

    #[test]
    fn ties_break_by_row_id() {
        let index = VectorIndex::build(
            "m",
            vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.5, 0.0]],
            vec![meta(0), meta(1), meta(2)],
        )
        .unwrap();
        let rows: Vec<usize> = index.search(&[1.0, 0.0], 3).iter().map(|h| h.0).collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn save_load_roundtrip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        let index = sample_index();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path, Some(3)).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.model(), "test-model");
        assert_eq!(loaded.entry(2), index.entry(2));

        let query = [0.3, -0.7, 0.2];
        let before = index.search(&query, 5);
        let after = loaded.search(&query, 5);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1.to_bits(), b.1.to_bits());
        }
    }

    #[test]
    fn save_replaces_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        sample_index().save(&path).unwrap();

        let small = VectorIndex::build("m2", vec![vec![1.0, 1.0]], vec![meta(0)]).unwrap();
        small.save(&path).unwrap();

        let loaded = VectorIndex::load(&path, None).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.dims(), 2);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn load_reports_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        assert!(matches!(
            VectorIndex::load(&path, None),
            Err(IndexUnavailableError::Missing(_))
        ));

        sample_index().save(&path).unwrap();
        let vectors = path.join(VECTORS_FILE);
        let mut bytes = fs::read(&vectors).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&vectors, bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(&path, None),
            Err(IndexUnavailableError::Corrupt(_))
        ));

        fs::write(&vectors, b"garbage").unwrap();
        assert!(matches!(
            VectorIndex::load(&path, None),
            Err(IndexUnavailableError::Corrupt(_))
        ));
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        sample_index().save(&path).unwrap();
        assert!(matches!(
            VectorIndex::load(&path, Some(768)),
            Err(IndexUnavailableError::DimensionMismatch {
                expected: 768,
                found: 3
            })
        ));
    }

    #[test]
    fn handle_swaps_without_disturbing_readers() {
        let handle = IndexHandle::empty();
        assert!(handle.current().is_none());

        handle.replace(Arc::new(sample_index()));
        let reader = handle.current().unwrap();
        assert_eq!(reader.len(), 5);

        let small = VectorIndex::build("m2", vec![vec![1.0, 1.0, 1.0]], vec![meta(0)]).unwrap();
        let previous = handle.replace(Arc::new(small)).unwrap();
        assert_eq!(previous.len(), 5);
        assert_eq!(reader.len(), 5);
        assert_eq!(handle.current().unwrap().len(), 1);
    }

    #[test]
    fn load_or_empty_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(VECTORS_FILE), b"junk").unwrap();
        fs::write(path.join(METADATA_FILE), b"{}").unwrap();
        assert!(IndexHandle::load_or_empty(&path, "test-model", None)
            .current()
            .is_none());
    }

    #[test]
    fn load_for_rejects_index_from_another_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore");
        sample_index().save(&path).unwrap();

        assert!(matches!(
            VectorIndex::load_for(&path, "nomic-embed-text", None),
            Err(IndexUnavailableError::ModelMismatch { .. })
        ));
        assert!(matches!(
            VectorIndex::load_for(&path, "test-model", Some(64)),
            Err(IndexUnavailableError::DimensionMismatch { expected: 64, found: 3 })
        ));
        assert_eq!(
            VectorIndex::load_for(&path, "test-model", None).unwrap().len(),
            5
        );

        let handle = IndexHandle::load_or_empty(&path, "nomic-embed-text", None);
        assert!(handle.current().is_none());
        let handle = IndexHandle::load_or_empty(&path, "test-model", Some(3));
        assert_eq!(handle.current().unwrap().len(), 5);
    }
}
