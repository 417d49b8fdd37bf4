use std::collections::{HashMap, HashSet};

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::chunk_store::{ChunkStore, SearchFilters};
use crate::error::{EngineError, Result};
use crate::types::{CodeChunk, IndexStatistics, InfoSnippet, ReindexOutcome};
use crate::vector_store::VectorStore;

// ---------------------------------------------------------------------------
// IndexManager — exclusive owner of the dual store for one index directory.
//
// All other components reach the stores through this type. Searches share a
// read lock and see one consistent snapshot; per-file re-index transactions
// take the write lock, so a search never observes half of a file swap.
//
// The reuse contract lives here: a chunk whose content hash survived the
// re-parse keeps its previous vector bytes and is never re-embedded.
// ---------------------------------------------------------------------------

pub const DB_FILE: &str = "index.sqlite3";

pub(crate) struct Stores {
    pub chunks: ChunkStore,
    pub vectors: VectorStore,
}

pub struct IndexManager {
    inner: RwLock<Stores>,
    index_dir: PathBuf,
    dimension: usize,
}

impl IndexManager {
    /// Open both stores under `index_dir`, creating them as needed.
    /// Surfaces `dimension_mismatch` untouched — the caller decides whether
    /// a forced rebuild is allowed.
    pub fn open(index_dir: &Path, dimension: usize, provider: &str) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let chunks = ChunkStore::open(&index_dir.join(DB_FILE))?;
        let vectors = VectorStore::open(index_dir, dimension, provider)?;
        Ok(Self {
            inner: RwLock::new(Stores { chunks, vectors }),
            index_dir: index_dir.to_path_buf(),
            dimension,
        })
    }

    /// Delete any existing vector index, then open fresh. The relational
    /// store is cleared rather than deleted so its file handle stays valid.
    pub fn open_forced(index_dir: &Path, dimension: usize, provider: &str) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        VectorStore::reset(index_dir)?;
        let mut manager = Self::open(index_dir, dimension, provider)?;
        manager.inner.get_mut().chunks.clear()?;
        Ok(manager)
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Shared snapshot for composite read operations (the search engine
    /// holds this across its whole candidate phase).
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Stores> {
        self.inner.read().await
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    pub async fn load(&self) -> Result<()> {
        let mut stores = self.inner.write().await;
        stores.vectors.load()
    }

    pub async fn save(&self) -> Result<()> {
        let stores = self.inner.read().await;
        stores.vectors.persist()
    }

    pub async fn clear(&self) -> Result<()> {
        let mut stores = self.inner.write().await;
        stores.chunks.clear()?;
        stores.vectors.clear();
        stores.vectors.persist()
    }

    // ── Change detection ────────────────────────────────────────────────────

    pub async fn needs_indexing(&self, path: &str, file_hash: &str) -> Result<bool> {
        let stores = self.inner.read().await;
        stores.chunks.needs_indexing(path, file_hash)
    }

    /// Record a file as indexed with zero chunks (parse failures), clearing
    /// any rows a previous successful parse left behind.
    pub async fn record_empty(&self, path: &str, file_hash: &str) -> Result<()> {
        let mut stores = self.inner.write().await;
        let prior_ids: Vec<String> = stores
            .chunks
            .get_by_path(path)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        stores.chunks.replace_file(path, &[], &[], Some(file_hash))?;
        for id in prior_ids {
            stores.vectors.remove(&id);
        }
        Ok(())
    }

    // ── The central primitive ───────────────────────────────────────────────

    /// Re-index one file with content-hash reuse.
    ///
    /// 1. Partition `new_chunks` into reused (content hash present in the
    ///    prior rows for `path`, with a live vector) and to-embed.
    /// 2. Embed the to-embed contents via `embed` (outside any lock).
    /// 3. Under the write lock, atomically: replace the file's chunk rows
    ///    and FileRecord, drop prior vectors, insert reused vector bytes
    ///    under their new ids, insert fresh vectors.
    ///
    /// A failure before the store swap leaves both stores untouched.
    pub async fn reindex_with_change_detection<F, Fut>(
        &self,
        path: &str,
        file_hash: &str,
        new_chunks: Vec<CodeChunk>,
        embed: F,
    ) -> Result<ReindexOutcome>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<Vec<f32>>>>,
    {
        // Snapshot prior state: content hash → vector bytes.
        let prior_vectors: HashMap<String, Vec<f32>> = {
            let stores = self.inner.read().await;
            let prior = stores.chunks.get_by_path(path)?;
            prior
                .iter()
                .filter_map(|c| {
                    stores
                        .vectors
                        .get(&c.id)
                        .map(|v| (c.content_hash.clone(), v.to_vec()))
                })
                .collect()
        };

        let mut reused: Vec<(String, Vec<f32>)> = Vec::new(); // (chunk id, vector)
        let mut to_embed_idx: Vec<usize> = Vec::new();
        for (i, c) in new_chunks.iter().enumerate() {
            match prior_vectors.get(&c.content_hash) {
                Some(v) => reused.push((c.id.clone(), v.clone())),
                None => to_embed_idx.push(i),
            }
        }

        let texts: Vec<String> = to_embed_idx
            .iter()
            .map(|&i| embedding_text(&new_chunks[i]))
            .collect();
        let embedded_vectors = if texts.is_empty() {
            vec![]
        } else {
            embed(texts).await?
        };
        if embedded_vectors.len() != to_embed_idx.len() {
            return Err(EngineError::Store(format!(
                "embedder returned {} vectors for {} chunks",
                embedded_vectors.len(),
                to_embed_idx.len()
            )));
        }
        // Validate dimensions before any store mutation so a mismatch
        // cannot leave the two stores disagreeing.
        for v in reused.iter().map(|(_, v)| v).chain(embedded_vectors.iter()) {
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    stored: self.dimension,
                    configured: v.len(),
                });
            }
        }

        let outcome = ReindexOutcome {
            total_chunks: new_chunks.len(),
            embedded_chunks: to_embed_idx.len(),
            reused_chunks: reused.len(),
        };

        // The swap. Prior ids are re-read under the write lock so vectors
        // belonging to rows committed since the snapshot are not orphaned.
        let mut stores = self.inner.write().await;
        let prior_ids: Vec<String> = stores
            .chunks
            .get_by_path(path)?
            .into_iter()
            .map(|c| c.id)
            .collect();

        stores
            .chunks
            .replace_file(path, &new_chunks, &[], Some(file_hash))?;

        for id in &prior_ids {
            stores.vectors.remove(id);
        }
        let mut batch = reused;
        for (slot, &i) in to_embed_idx.iter().enumerate() {
            batch.push((new_chunks[i].id.clone(), embedded_vectors[slot].clone()));
        }
        stores.vectors.add_batch(batch)?;

        Ok(outcome)
    }

    /// Replace the snippet rows for `path`. Snippets carry no vectors.
    pub async fn reindex_snippets(&self, path: &str, snippets: Vec<InfoSnippet>) -> Result<usize> {
        let stores = self.inner.write().await;
        stores.chunks.replace_snippets(path, &snippets)?;
        Ok(snippets.len())
    }

    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let mut stores = self.inner.write().await;
        let prior_ids: Vec<String> = stores
            .chunks
            .get_by_path(path)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        stores.chunks.remove_file(path)?;
        for id in prior_ids {
            stores.vectors.remove(&id);
        }
        Ok(())
    }

    // ── Read pass-throughs ──────────────────────────────────────────────────

    pub async fn statistics(&self) -> Result<IndexStatistics> {
        let stores = self.inner.read().await;
        stores.chunks.statistics()
    }

    pub async fn get(&self, id: &str) -> Result<Option<CodeChunk>> {
        let stores = self.inner.read().await;
        stores.chunks.get(id)
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Vec<CodeChunk>> {
        let stores = self.inner.read().await;
        stores.chunks.get_by_path(path)
    }

    pub async fn file_record(&self, path: &str) -> Result<Option<crate::types::FileRecord>> {
        let stores = self.inner.read().await;
        stores.chunks.file_record(path)
    }

    pub async fn bm25_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(String, f64, usize)>> {
        let stores = self.inner.read().await;
        stores.chunks.bm25_search(query, limit, filters)
    }

    pub async fn knn(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let stores = self.inner.read().await;
        stores.vectors.knn(query, k)
    }

    /// True when every chunk for `path` has a vector and no vector in the
    /// store is orphaned from the chunk table. Diagnostic surface for the
    /// parity invariant.
    pub async fn verify_parity(&self, path: &str) -> Result<bool> {
        let stores = self.inner.read().await;
        let path_ids: Vec<String> = stores
            .chunks
            .get_by_path(path)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if !path_ids.iter().all(|id| stores.vectors.contains(id)) {
            return Ok(false);
        }
        let all_ids: HashSet<String> = stores.chunks.all_ids()?.into_iter().collect();
        let result = stores.vectors.ids().all(|id| all_ids.contains(id));
        Ok(result)
    }
}

/// The text handed to the embedder for a chunk: a symbol header (when the
/// chunk declares anything) over the raw content, capped to keep one giant
/// literal from dominating a batch.
pub fn embedding_text(chunk: &CodeChunk) -> String {
    const EMBED_CONTENT_CAP: usize = 16_000;

    let mut body = chunk.content.as_str();
    if body.len() > EMBED_CONTENT_CAP {
        let mut cut = EMBED_CONTENT_CAP;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body = &body[..cut];
    }

    if chunk.symbols.is_empty() {
        format!("passage: file: {}\n{}", chunk.path, body)
    } else {
        format!(
            "symbols: {}\npassage: file: {}\n{}",
            chunk.symbols.join(", "),
            chunk.path,
            body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk_id, xxh3_hex};
    use crate::types::ChunkKind;
    use chrono::Utc;

    fn make_chunk(path: &str, start: u32, symbol: &str, content: &str) -> CodeChunk {
        CodeChunk {
            id: chunk_id(path, start, ChunkKind::Function, Some(symbol)),
            path: path.to_string(),
            content: content.to_string(),
            start_line: start,
            end_line: start + 2,
            kind: ChunkKind::Function,
            symbols: vec![symbol.to_string()],
            references: vec![],
            file_hash: "fh".to_string(),
            content_hash: xxh3_hex(content.as_bytes()),
            doc_comment: None,
            signature: None,
            breadcrumb: None,
            token_count: 1,
            language: "rust".to_string(),
            generated_description: None,
            created_at: Utc::now(),
        }
    }

    fn test_embedder(dim: usize) -> impl Fn(Vec<String>) -> Vec<Vec<f32>> + Clone {
        move |texts: Vec<String>| {
            texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; dim];
                    v[0] = t.len() as f32;
                    v
                })
                .collect()
        }
    }

    async fn open_manager(dim: usize) -> (tempfile::TempDir, IndexManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = IndexManager::open(dir.path(), dim, "hashed").unwrap();
        (dir, mgr)
    }

    #[tokio::test]
    async fn reindex_embeds_everything_first_time() {
        let (_dir, mgr) = open_manager(4).await;
        let embed = test_embedder(4);

        let chunks = vec![
            make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}"),
            make_chunk("src/a.rs", 10, "beta", "fn beta() {}"),
        ];
        let outcome = mgr
            .reindex_with_change_detection("src/a.rs", "fh", chunks, |texts| async move {
                Ok(embed(texts))
            })
            .await
            .unwrap();

        assert_eq!(outcome.total_chunks, 2);
        assert_eq!(outcome.embedded_chunks, 2);
        assert_eq!(outcome.reused_chunks, 0);
        assert!(mgr.verify_parity("src/a.rs").await.unwrap());
        assert!(!mgr.needs_indexing("src/a.rs", "fh").await.unwrap());
    }

    #[tokio::test]
    async fn unchanged_chunks_keep_identical_vector_bytes() {
        let (_dir, mgr) = open_manager(4).await;
        let embed = test_embedder(4);

        let first = vec![
            make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}"),
            make_chunk("src/a.rs", 10, "beta", "fn beta() { old(); }"),
        ];
        let e1 = embed.clone();
        mgr.reindex_with_change_detection("src/a.rs", "fh1", first.clone(), |t| async move {
            Ok(e1(t))
        })
        .await
        .unwrap();

        let alpha_vec_before = {
            let stores = mgr.read().await;
            stores.vectors.get(&first[0].id).unwrap().to_vec()
        };

        // Second pass: alpha untouched, beta's body changed.
        let second = vec![
            make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}"),
            make_chunk("src/a.rs", 10, "beta", "fn beta() { brand_new(); }"),
        ];
        let e2 = embed.clone();
        let outcome = mgr
            .reindex_with_change_detection("src/a.rs", "fh2", second.clone(), |t| async move {
                Ok(e2(t))
            })
            .await
            .unwrap();

        assert_eq!(outcome.total_chunks, 2);
        assert_eq!(outcome.reused_chunks, 1);
        assert_eq!(outcome.embedded_chunks, 1);

        let stores = mgr.read().await;
        assert_eq!(
            stores.vectors.get(&second[0].id).unwrap(),
            alpha_vec_before.as_slice(),
            "reused chunk must keep byte-identical vector"
        );
        assert!(stores.vectors.contains(&second[1].id));
        assert_eq!(stores.vectors.len(), 2);
    }

    #[tokio::test]
    async fn embed_failure_leaves_stores_untouched() {
        let (_dir, mgr) = open_manager(4).await;
        let embed = test_embedder(4);

        let first = vec![make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}")];
        let e1 = embed.clone();
        mgr.reindex_with_change_detection("src/a.rs", "fh1", first.clone(), |t| async move {
            Ok(e1(t))
        })
        .await
        .unwrap();

        let changed = vec![make_chunk("src/a.rs", 1, "alpha", "fn alpha() { v2(); }")];
        let err = mgr
            .reindex_with_change_detection("src/a.rs", "fh2", changed, |_t| async move {
                Err(EngineError::EmbedderUnavailable("down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbedderUnavailable(_)));

        // Old state fully intact, including the FileRecord.
        assert_eq!(mgr.get_by_path("src/a.rs").await.unwrap().len(), 1);
        assert!(!mgr.needs_indexing("src/a.rs", "fh1").await.unwrap());
        assert!(mgr.needs_indexing("src/a.rs", "fh2").await.unwrap());
        assert!(mgr.verify_parity("src/a.rs").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_dimension_vector_aborts_before_any_write() {
        let (_dir, mgr) = open_manager(4).await;

        let chunks = vec![make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}")];
        let err = mgr
            .reindex_with_change_detection("src/a.rs", "fh", chunks, |t| async move {
                Ok(t.iter().map(|_| vec![0.0f32; 3]).collect())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));

        assert!(mgr.get_by_path("src/a.rs").await.unwrap().is_empty());
        let stores = mgr.read().await;
        assert_eq!(stores.vectors.len(), 0);
    }

    #[tokio::test]
    async fn remove_file_drops_chunks_and_vectors_together() {
        let (_dir, mgr) = open_manager(4).await;
        let embed = test_embedder(4);

        let chunks = vec![make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}")];
        mgr.reindex_with_change_detection("src/a.rs", "fh", chunks, |t| async move {
            Ok(embed(t))
        })
        .await
        .unwrap();

        mgr.remove_file("src/a.rs").await.unwrap();
        assert!(mgr.get_by_path("src/a.rs").await.unwrap().is_empty());
        let stats = mgr.statistics().await.unwrap();
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.file_count, 0);
        let stores = mgr.read().await;
        assert_eq!(stores.vectors.len(), 0);
    }

    #[tokio::test]
    async fn save_load_round_trip_preserves_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<String>;
        {
            let mgr = IndexManager::open(dir.path(), 4, "hashed").unwrap();
            let embed = test_embedder(4);
            let chunks = vec![make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}")];
            ids = chunks.iter().map(|c| c.id.clone()).collect();
            mgr.reindex_with_change_detection("src/a.rs", "fh", chunks, |t| async move {
                Ok(embed(t))
            })
            .await
            .unwrap();
            mgr.save().await.unwrap();
        }

        let mgr = IndexManager::open(dir.path(), 4, "hashed").unwrap();
        let stores = mgr.read().await;
        assert!(stores.vectors.contains(&ids[0]));
        assert_eq!(stores.chunks.statistics().unwrap().chunk_count, 1);
    }

    #[test]
    fn embedding_text_carries_symbol_header() {
        let c = make_chunk("src/a.rs", 1, "alpha", "fn alpha() {}");
        let text = embedding_text(&c);
        assert!(text.starts_with("symbols: alpha\n"));
        assert!(text.contains("passage: file: src/a.rs"));
    }
}
