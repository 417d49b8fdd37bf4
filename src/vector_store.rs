use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// VectorStore — flat-file vector index, no external DB.
//
//  vectors.json        { "entries": { "<chunk id>": [f32; D], ... } }
//  vectors_meta.json   { "dimension": D, "provider": "model2vec" }
//
// The dimension D is fixed when the store is first created; every write is
// checked against it and a mismatch is fatal. k-NN is a brute-force cosine
// sweep (rayon) — exact rather than approximate, which at code-repo scale
// (10^4-10^5 chunks × a few hundred dims) stays well under a millisecond
// budget per query and keeps the on-disk format trivially portable.
//
// Durability boundary: persist() writes temp files and renames them into
// place, so a crash mid-save leaves the previous index intact.
// ---------------------------------------------------------------------------

const VECTORS_FILE: &str = "vectors.json";
const META_FILE: &str = "vectors_meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorMeta {
    dimension: usize,
    provider: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorFile {
    entries: BTreeMap<String, Vec<f32>>,
}

pub struct VectorStore {
    dir: PathBuf,
    dimension: usize,
    provider: String,
    entries: BTreeMap<String, Vec<f32>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dir", &self.dir)
            .field("dimension", &self.dimension)
            .field("provider", &self.provider)
            .finish()
    }
}

impl VectorStore {
    /// Open (or create) the store under `dir` with dimension `dimension`.
    ///
    /// A pre-existing store whose recorded dimension differs is a hard
    /// operator error: the caller must force a rebuild via [`Self::reset`].
    pub fn open(dir: &Path, dimension: usize, provider: &str) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::InvalidArgument(
                "vector dimension must be positive".to_string(),
            ));
        }
        std::fs::create_dir_all(dir)?;

        if let Some(stored) = Self::existing_dimension(dir) {
            if stored != dimension {
                return Err(EngineError::DimensionMismatch {
                    stored,
                    configured: dimension,
                });
            }
        }

        let mut store = Self {
            dir: dir.to_path_buf(),
            dimension,
            provider: provider.to_string(),
            entries: BTreeMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Inspect a pre-existing store's dimension without loading any vectors.
    pub fn existing_dimension(dir: &Path) -> Option<usize> {
        let text = std::fs::read_to_string(dir.join(META_FILE)).ok()?;
        serde_json::from_str::<VectorMeta>(&text)
            .ok()
            .map(|m| m.dimension)
    }

    /// Delete the on-disk store so a rebuild starts from nothing.
    pub fn reset(dir: &Path) -> Result<()> {
        for f in [VECTORS_FILE, META_FILE] {
            let p = dir.join(f);
            if p.exists() {
                std::fs::remove_file(&p)?;
            }
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    pub fn add(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                stored: self.dimension,
                configured: vector.len(),
            });
        }
        self.entries.insert(id.to_string(), vector);
        Ok(())
    }

    pub fn add_batch(&mut self, batch: Vec<(String, Vec<f32>)>) -> Result<()> {
        // Validate the whole batch first so a mid-batch mismatch cannot
        // leave a partial write behind.
        for (_, v) in &batch {
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    stored: self.dimension,
                    configured: v.len(),
                });
            }
        }
        for (id, v) in batch {
            self.entries.insert(id, v);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // ── Search ──────────────────────────────────────────────────────────────

    /// Top-k by cosine similarity, descending, ties broken by ascending id.
    /// Similarity is bounded to [-1, 1].
    pub fn knn(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                stored: self.dimension,
                configured: query.len(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(String, f32)> = self
            .entries
            .par_iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    // ── Durability ──────────────────────────────────────────────────────────

    /// Atomic save: write to temp files, then rename over the live ones.
    pub fn persist(&self) -> Result<()> {
        let meta = VectorMeta {
            dimension: self.dimension,
            provider: self.provider.clone(),
        };
        let file = VectorFile {
            entries: self.entries.clone(),
        };

        write_atomic(
            &self.dir.join(META_FILE),
            serde_json::to_string(&meta)
                .map_err(|e| EngineError::Store(format!("meta serialize: {e}")))?
                .as_bytes(),
        )?;
        write_atomic(
            &self.dir.join(VECTORS_FILE),
            serde_json::to_string(&file)
                .map_err(|e| EngineError::Store(format!("vectors serialize: {e}")))?
                .as_bytes(),
        )?;
        Ok(())
    }

    /// Replace the in-memory map with the on-disk state. A missing or
    /// corrupted vectors file starts empty (the index rebuilds lazily).
    pub fn load(&mut self) -> Result<()> {
        let path = self.dir.join(VECTORS_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(_) => {
                self.entries = BTreeMap::new();
                return Ok(());
            }
        };
        match serde_json::from_str::<VectorFile>(&text) {
            Ok(file) => {
                self.entries = file.entries;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "vector index unreadable, rebuilding");
                self.entries = BTreeMap::new();
            }
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
