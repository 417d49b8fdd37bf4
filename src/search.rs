use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::chunk_store::SearchFilters;
use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::error::{EngineError, Result};
use crate::index_manager::IndexManager;
use crate::types::{ChunkKind, CodeChunk, SearchResult, SnippetResult};

// ---------------------------------------------------------------------------
// HybridSearchEngine — BM25 ⊕ k-NN via reciprocal rank fusion.
//
//   rrf(id) = Σ over source lists  weight / (k + rank)
//
// with rank 1-based per list, k = rrf_k, and weights (1−w)/w when a
// semantic weight is set (both 1 otherwise). Candidates are oversampled
// 3× from each source, deduplicated by chunk id, min-max scaled into a
// relevance percentage, and cut to the limit with ascending-id ties.
//
// The whole candidate phase runs under one store read guard, so a search
// sees either all-old or all-new rows for any concurrently re-indexed file.
//
// Multi-hop expansion follows `references` from the direct results:
// symbol-exact resolution first, best-BM25 on the reference text second,
// at most 2 chunks per reference, deduplicated across hops, appended
// after the direct matches ordered by (hop depth, inherited score).
// ---------------------------------------------------------------------------

const OVERSAMPLE: usize = 3;
/// Max chunks a single reference may resolve to.
const HOP_RESOLVE_LIMIT: usize = 2;
/// Hopped results inherit their seed's score damped by this per hop.
const HOP_DECAY: f64 = 0.5;
/// Frontier bound per hop; keeps a dense reference graph from exploding.
const HOP_FRONTIER_LIMIT: usize = 32;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Fusion weight of the semantic list in [0, 1]; `None` leaves both
    /// sources at weight 1.
    pub semantic_weight: Option<f64>,
    pub rrf_k: u32,
    pub path_filter: Option<String>,
    pub extension_filter: Option<Vec<String>>,
    pub kind_filter: Option<Vec<ChunkKind>>,
    pub multi_hop: bool,
    pub multi_hop_depth: u32,
}

impl SearchOptions {
    pub fn from_config(cfg: &SearchConfig) -> Self {
        Self {
            limit: cfg.default_limit,
            semantic_weight: Some(cfg.semantic_weight),
            rrf_k: cfg.rrf_k,
            path_filter: None,
            extension_filter: None,
            kind_filter: None,
            multi_hop: cfg.multi_hop_enabled,
            multi_hop_depth: cfg.multi_hop_depth,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(EngineError::InvalidArgument("limit must be >= 1".into()));
        }
        if let Some(w) = self.semantic_weight {
            if !(0.0..=1.0).contains(&w) || !w.is_finite() {
                return Err(EngineError::InvalidArgument(format!(
                    "semantic_weight must be within [0, 1], got {w}"
                )));
            }
        }
        if self.rrf_k == 0 {
            return Err(EngineError::InvalidArgument("rrf_k must be >= 1".into()));
        }
        if self.multi_hop_depth > 5 {
            return Err(EngineError::InvalidArgument(format!(
                "multi_hop_depth must be within 0..=5, got {}",
                self.multi_hop_depth
            )));
        }
        Ok(())
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            extensions: self.extension_filter.clone(),
            path_glob: self.path_filter.clone(),
            kinds: self.kind_filter.clone(),
        }
    }
}

/// Optional adapter that turns one query into alternates (synonyms, LLM
/// expansion). Failures are logged and ignored; absence never fails a
/// search.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str) -> Result<Vec<String>>;
}

/// Optional adapter that post-processes a result set into a summary.
#[async_trait]
pub trait ResultSynthesizer: Send + Sync {
    async fn synthesize(&self, query: &str, results: &[SearchResult]) -> Result<String>;
}

pub struct HybridSearchEngine {
    manager: Arc<IndexManager>,
    embedder: Arc<dyn Embedder>,
    expander: Option<Arc<dyn QueryExpander>>,
    synthesizer: Option<Arc<dyn ResultSynthesizer>>,
}

impl HybridSearchEngine {
    pub fn new(manager: Arc<IndexManager>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            manager,
            embedder,
            expander: None,
            synthesizer: None,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ResultSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        opts.validate()?;
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        // Alternate queries first (no store access), then embeddings, so the
        // store guard is held only for the candidate phase itself.
        let mut queries = vec![query.to_string()];
        if let Some(expander) = &self.expander {
            match expander.expand(query).await {
                Ok(extra) => queries.extend(extra.into_iter().filter(|q| !q.trim().is_empty())),
                Err(e) => tracing::debug!(error = %e, "query expansion unavailable"),
            }
        }

        let query_vectors = self.embedder.embed(&queries).await?;
        let filters = opts.filters();
        let (bm25_w, sem_w) = match opts.semantic_weight {
            Some(w) => (1.0 - w, w),
            None => (1.0, 1.0),
        };
        let k = opts.rrf_k as f64;
        let oversample = opts.limit * OVERSAMPLE;

        // Candidate phase under one snapshot.
        let stores = self.manager.read().await;

        #[derive(Default, Clone)]
        struct Fused {
            score: f64,
            bm25_score: Option<f64>,
            bm25_rank: Option<usize>,
            semantic_score: Option<f64>,
            semantic_rank: Option<usize>,
        }
        let mut fused: HashMap<String, Fused> = HashMap::new();

        for (q, qvec) in queries.iter().zip(query_vectors.iter()) {
            // Keyword list.
            for (id, score, rank) in stores.chunks.bm25_search(q, oversample, &filters)? {
                let e = fused.entry(id).or_default();
                e.score += bm25_w / (k + rank as f64);
                // Across expanded queries, keep the best rank for display.
                if e.bm25_rank.map(|r| rank < r).unwrap_or(true) {
                    e.bm25_rank = Some(rank);
                    e.bm25_score = Some(score);
                }
            }

            // Semantic list: over-fetch, join with chunk metadata for the
            // filters the vector store cannot apply, re-rank the survivors.
            let raw = stores.vectors.knn(qvec, oversample * 2)?;
            let mut rank = 0usize;
            for (id, sim) in raw {
                if !filters.is_empty() {
                    let Some(chunk) = stores.chunks.get(&id)? else {
                        continue;
                    };
                    if !filters.admits(&chunk) {
                        continue;
                    }
                }
                rank += 1;
                if rank > oversample {
                    break;
                }
                let e = fused.entry(id).or_default();
                e.score += sem_w / (k + rank as f64);
                if e.semantic_rank.map(|r| rank < r).unwrap_or(true) {
                    e.semantic_rank = Some(rank);
                    e.semantic_score = Some(sim as f64);
                }
            }
        }

        if fused.is_empty() {
            return Ok(vec![]);
        }

        // Deterministic order: fused score descending, id ascending.
        let mut ranked: Vec<(String, Fused)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(opts.limit);

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut chunk_by_id: HashMap<String, CodeChunk> = stores
            .chunks
            .get_many(&ids)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let max_score = ranked.first().map(|(_, f)| f.score).unwrap_or(0.0);
        let min_score = ranked.last().map(|(_, f)| f.score).unwrap_or(0.0);

        let mut results: Vec<SearchResult> = Vec::with_capacity(ranked.len());
        for (id, f) in &ranked {
            // A candidate whose row vanished mid-phase was deleted by a
            // concurrent writer; dropping it keeps the snapshot coherent.
            let Some(chunk) = chunk_by_id.remove(id) else {
                continue;
            };
            results.push(SearchResult {
                chunk,
                score: f.score,
                bm25_score: f.bm25_score,
                semantic_score: f.semantic_score,
                bm25_rank: f.bm25_rank,
                semantic_rank: f.semantic_rank,
                is_multi_hop: false,
                hop_depth: 0,
                relevance_percent: relevance_percent(f.score, min_score, max_score),
            });
        }

        if opts.multi_hop && opts.multi_hop_depth > 0 {
            let hopped = self.expand_hops(&stores, &results, opts, min_score, max_score)?;
            results.extend(hopped);
        }

        Ok(results)
    }

    /// Follow `references` from the direct results, breadth-first, up to
    /// the configured depth.
    fn expand_hops(
        &self,
        stores: &crate::index_manager::Stores,
        direct: &[SearchResult],
        opts: &SearchOptions,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<SearchResult>> {
        let filters = opts.filters();
        let mut seen: HashSet<String> = direct.iter().map(|r| r.chunk.id.clone()).collect();
        let mut frontier: Vec<(CodeChunk, f64)> = direct
            .iter()
            .map(|r| (r.chunk.clone(), r.score))
            .collect();
        let mut hopped: Vec<SearchResult> = Vec::new();

        for depth in 1..=opts.multi_hop_depth {
            let mut next: Vec<(CodeChunk, f64)> = Vec::new();

            for (chunk, seed_score) in &frontier {
                for reference in &chunk.references {
                    let mut resolved: Vec<CodeChunk> =
                        stores.chunks.chunks_by_symbol(reference, HOP_RESOLVE_LIMIT)?;
                    if resolved.len() < HOP_RESOLVE_LIMIT {
                        let want = HOP_RESOLVE_LIMIT - resolved.len();
                        for (id, _, _) in stores.chunks.bm25_search(reference, want, &filters)? {
                            if resolved.iter().any(|c| c.id == id) {
                                continue;
                            }
                            if let Some(c) = stores.chunks.get(&id)? {
                                resolved.push(c);
                            }
                        }
                    }

                    for candidate in resolved {
                        if !seen.insert(candidate.id.clone()) {
                            continue;
                        }
                        if !filters.is_empty() && !filters.admits(&candidate) {
                            continue;
                        }
                        let score = seed_score * HOP_DECAY.powi(depth as i32);
                        next.push((candidate.clone(), score));
                        hopped.push(SearchResult {
                            chunk: candidate,
                            score,
                            bm25_score: None,
                            semantic_score: None,
                            bm25_rank: None,
                            semantic_rank: None,
                            is_multi_hop: true,
                            hop_depth: depth,
                            relevance_percent: relevance_percent(score, min_score, max_score),
                        });
                    }
                }
            }

            if next.is_empty() {
                break;
            }
            next.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.id.cmp(&b.0.id))
            });
            next.truncate(HOP_FRONTIER_LIMIT);
            frontier = next;
        }

        hopped.sort_by(|a, b| {
            a.hop_depth
                .cmp(&b.hop_depth)
                .then_with(|| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        Ok(hopped)
    }

    /// FTS over prose snippets with the same relevance scaling as chunks.
    pub async fn search_info_snippets(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<SnippetResult>> {
        if limit == 0 {
            return Err(EngineError::InvalidArgument("limit must be >= 1".into()));
        }
        if query.trim().is_empty() {
            return Ok(vec![]);
        }

        let stores = self.manager.read().await;
        let hits = stores.chunks.fts_snippet_search(query, limit, path_filter)?;
        let max = hits.first().map(|(_, s)| *s).unwrap_or(0.0);
        let min = hits.last().map(|(_, s)| *s).unwrap_or(0.0);

        Ok(hits
            .into_iter()
            .map(|(snippet, score)| SnippetResult {
                snippet,
                score,
                relevance_percent: relevance_percent(score, min, max),
            })
            .collect())
    }

    /// Run the optional synthesizer over a result set. `None` when no
    /// adapter is installed; adapter failure is surfaced.
    pub async fn synthesize(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Option<String>> {
        match &self.synthesizer {
            Some(s) => s.synthesize(query, results).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Min-max scale `score` into [0, 100] with two-decimal rounding. A
/// degenerate range (single result, exact ties everywhere) maps to 100.
fn relevance_percent(score: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    let pct = if span <= f64::EPSILON {
        100.0
    } else {
        ((score - min) / span * 100.0).clamp(0.0, 100.0)
    };
    (pct * 100.0).round() / 100.0
}
