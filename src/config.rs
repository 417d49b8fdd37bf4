use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard safety ceiling: files larger than this are **always** skipped, regardless of config.
/// This protects low-RAM machines from trying to tree-sitter-parse a 10 MB minified bundle.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 4_000_000; // 4 MB

/// Controls workspace scanning behavior (what to admit).
///
/// Note: `.gitignore` is always respected by the scanner; these are additional
/// filters on top of the standard ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File extensions (lowercase, no dot) admitted for indexing.
    /// Empty means "every extension the chunker supports".
    pub include_extensions: Vec<String>,
    /// Path substrings to exclude anywhere in the tree (e.g. "generated", "vendor").
    pub exclude_patterns: Vec<String>,
    /// Files above this byte size are skipped before parsing.
    pub max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_extensions: vec![],
            exclude_patterns: vec![],
            // 512 KB default — enough for any real source file, blocks log/generated bloat.
            max_file_size: 512 * 1024,
        }
    }
}

/// Embedding provider selection and batching thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider backend: "model2vec" (local static model) or "hashed"
    /// (deterministic feature-hash projection, always available).
    pub provider: String,
    /// HuggingFace model repo ID used by Model2Vec-RS when provider = "model2vec".
    pub model: String,
    /// Vector dimension; must match the vector store at open time.
    pub dimension: usize,
    /// Soft batch size (count of queued texts) triggering a flush.
    pub batch_size: usize,
    /// Maximum wait before a partially-filled batch is flushed.
    pub batch_timeout_ms: u64,
    /// Approximate byte budget of queued text; reaching it forces a flush
    /// and blocks further submissions until the queue drains.
    pub batch_memory_limit_mb: usize,
    /// Per-call timeout for embedder/LLM adapters.
    pub provider_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "model2vec".to_string(),
            model: "minishlab/potion-retrieval-32M".to_string(),
            dimension: 512,
            batch_size: 32,
            batch_timeout_ms: 200,
            batch_memory_limit_mb: 8,
            provider_timeout_ms: 30_000,
        }
    }
}

/// Hybrid search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Fusion weight for the semantic list, in [0, 1]. BM25 gets `1 - w`.
    pub semantic_weight: f64,
    /// Reciprocal-rank-fusion constant; must be > 0.
    pub rrf_k: u32,
    /// Default max number of results to return.
    pub default_limit: usize,
    /// Whether reference-following expansion runs by default.
    pub multi_hop_enabled: bool,
    /// Bounded hop depth, 0..=5.
    pub multi_hop_depth: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.5,
            rrf_k: 60,
            default_limit: 20,
            multi_hop_enabled: false,
            multi_hop_depth: 1,
        }
    }
}

/// Chunking granularity for the window fallback and oversized declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target lines per chunk for window-based strategies.
    pub chunk_size: usize,
    /// Overlapping lines between consecutive window chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 80,
            chunk_overlap: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory (relative to the repo root unless absolute) holding the
    /// SQLite database, the vector index, and its sidecars.
    pub index_path: PathBuf,
    /// Scratch directory for provider caches.
    pub cache_path: PathBuf,
    pub scan: ScanConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub chunking: ChunkingConfig,
    /// Sliding event-coalescing window for the filesystem watcher.
    pub watch_debounce_ms: u64,
    /// Upper bound on concurrently processed files; 0 means "CPU count".
    pub max_concurrent_tasks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(".codequarry/index"),
            cache_path: PathBuf::from(".codequarry/cache"),
            scan: ScanConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            chunking: ChunkingConfig::default(),
            watch_debounce_ms: 500,
            max_concurrent_tasks: 0,
        }
    }
}

impl Config {
    /// Effective concurrency bound, resolving 0 to the CPU count.
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrent_tasks > 0 {
            self.max_concurrent_tasks
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Effective per-file byte limit, clamped under the hard ceiling.
    pub fn effective_max_file_size(&self) -> u64 {
        self.scan.max_file_size.min(ABSOLUTE_MAX_FILE_BYTES)
    }

    pub fn index_dir(&self, repo_root: &Path) -> PathBuf {
        if self.index_path.is_absolute() {
            self.index_path.clone()
        } else {
            repo_root.join(&self.index_path)
        }
    }
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".codequarry.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.search.rrf_k, 60);
        assert!(cfg.search.semantic_weight >= 0.0 && cfg.search.semantic_weight <= 1.0);
        assert!(cfg.effective_concurrency() >= 1);
        assert!(cfg.effective_max_file_size() <= ABSOLUTE_MAX_FILE_BYTES);
    }

    #[test]
    fn partial_config_merges_with_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{ "watch_debounce_ms": 250, "search": { "rrf_k": 10 } }"#)
                .unwrap();
        assert_eq!(cfg.watch_debounce_ms, 250);
        assert_eq!(cfg.search.rrf_k, 10);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.embedding.batch_size, 32);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.index_path, PathBuf::from(".codequarry/index"));
    }
}
