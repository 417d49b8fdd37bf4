use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embed::{resolve_embedder, Embedder, EmbeddingBatcher};
use crate::error::{EngineError, Result};
use crate::index_manager::IndexManager;
use crate::pipeline::{run_index, PipelineOptions, ProgressFn};
use crate::search::{HybridSearchEngine, SearchOptions};
use crate::tasks::{Task, TaskManager, TaskStatus};
use crate::types::{IndexReport, IndexStatistics, SearchResult, SnippetResult};
use crate::watcher::IncrementalIndexer;

// ---------------------------------------------------------------------------
// Engine — the assembled system for one repository root.
//
// Owns the resolved embedder, the batcher, the index manager, the search
// engine and the task table. Construction is where the dimension contract
// is enforced: an existing index built at another dimension refuses to
// open unless the caller forces a rebuild.
// ---------------------------------------------------------------------------

pub struct Engine {
    repo_root: PathBuf,
    config: Config,
    embedder: Arc<dyn Embedder>,
    manager: Arc<IndexManager>,
    batcher: Arc<EmbeddingBatcher>,
    search: HybridSearchEngine,
    tasks: Arc<TaskManager>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("repo_root", &self.repo_root)
            .finish()
    }
}

impl Engine {
    /// Open the engine for `repo_root`. `force` deletes and recreates the
    /// vector index (and clears the chunk store) before opening, which is
    /// the only way past a `dimension_mismatch`.
    pub fn open(repo_root: &Path, config: Config, force: bool) -> Result<Self> {
        let embedder = resolve_embedder(&config.embedding)?;
        let index_dir = config.index_dir(repo_root);
        let dimension = embedder.dimension();

        let manager = if force {
            IndexManager::open_forced(&index_dir, dimension, embedder.name())?
        } else {
            IndexManager::open(&index_dir, dimension, embedder.name())?
        };
        let manager = Arc::new(manager);
        let batcher = Arc::new(EmbeddingBatcher::new(Arc::clone(&embedder), &config.embedding));
        let search = HybridSearchEngine::new(Arc::clone(&manager), Arc::clone(&embedder));

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            config,
            embedder,
            manager,
            batcher,
            search,
            tasks: TaskManager::new(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn search_engine(&self) -> &HybridSearchEngine {
        &self.search
    }

    pub fn default_search_options(&self) -> SearchOptions {
        SearchOptions::from_config(&self.config.search)
    }

    // ── Synchronous-style operations ────────────────────────────────────────

    /// Run the full indexing pipeline to completion.
    pub async fn index(
        &self,
        force: bool,
        cancel: CancellationToken,
        on_progress: Option<ProgressFn>,
    ) -> Result<IndexReport> {
        run_index(
            &self.repo_root,
            &self.config,
            Arc::clone(&self.manager),
            Arc::clone(&self.batcher),
            PipelineOptions {
                force,
                cancel,
                on_progress,
            },
        )
        .await
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.search.search(query, opts).await
    }

    pub async fn search_info_snippets(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<SnippetResult>> {
        self.search.search_info_snippets(query, limit, path_filter).await
    }

    pub async fn statistics(&self) -> Result<IndexStatistics> {
        self.manager.statistics().await
    }

    /// Build (but do not start) a watcher wired to this engine's stores.
    pub fn watcher(&self) -> IncrementalIndexer {
        IncrementalIndexer::new(
            &self.repo_root,
            &self.config,
            Arc::clone(&self.manager),
            Arc::clone(&self.batcher),
        )
    }

    // ── Async task surface ──────────────────────────────────────────────────

    /// Start the pipeline as a managed task: callers poll `tasks()` for
    /// progress and fetch the report via `await_task`/`get_result`.
    pub fn spawn_index_task(
        &self,
        force: bool,
        ttl_ms: Option<u64>,
        poll_interval_ms: Option<u64>,
    ) -> Result<Task> {
        let task = self.tasks.create(ttl_ms, poll_interval_ms);
        let task_id = task.task_id.clone();
        let cancel = self.tasks.get_cancellation_token(&task_id)?;

        let tasks = Arc::clone(&self.tasks);
        let manager = Arc::clone(&self.manager);
        let batcher = Arc::clone(&self.batcher);
        let repo_root = self.repo_root.clone();
        let config = self.config.clone();

        let progress_tasks = Arc::clone(&self.tasks);
        let progress_id = task_id.clone();
        let on_progress: ProgressFn = Arc::new(move |p| {
            let _ = progress_tasks.update_progress(&progress_id, p);
        });

        let handle = tokio::spawn(async move {
            let outcome = run_index(
                &repo_root,
                &config,
                manager,
                batcher,
                PipelineOptions {
                    force,
                    cancel,
                    on_progress: Some(on_progress),
                },
            )
            .await;

            match outcome {
                Ok(report) => match serde_json::to_value(&report) {
                    Ok(value) => {
                        let _ = tasks.store_result(&task_id, value);
                    }
                    Err(e) => {
                        let _ = tasks.fail(&task_id, format!("report serialization: {e}"));
                    }
                },
                Err(EngineError::Cancelled) => {
                    // TTL or caller cancellation already drove the terminal
                    // transition; this is a no-op when it did.
                    let _ = tasks.update_status(&task_id, TaskStatus::Cancelled, None);
                }
                Err(e) => {
                    let _ = tasks.fail(&task_id, e.to_string());
                }
            }
        });
        self.tasks.attach_work(&task.task_id, handle.abort_handle())?;

        Ok(task)
    }
}
