use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunker;
use crate::config::Config;
use crate::embed::EmbeddingBatcher;
use crate::error::{EngineError, Result};
use crate::index_manager::IndexManager;
use crate::scanner::{enumerate_files, FileEntry, ScanOptions};
use crate::types::{IndexReport, IndexingPhase, IndexingProgress};

// ---------------------------------------------------------------------------
// Indexing pipeline — enumerate → parse → hash-diff → embed → persist.
//
// Work units run under a bounded JoinSet that refills as units finish, so
// at most `max_concurrent_tasks` files are in flight. Non-fatal errors
// (parse, io, store) are counted and the run continues; a dimension
// mismatch or cancellation tears the whole run down.
//
// Progress cadence: a snapshot every 5 completed files, every 2 seconds,
// or on the last file, whichever comes first.
// ---------------------------------------------------------------------------

const PROGRESS_EVERY_FILES: usize = 5;
const PROGRESS_EVERY: Duration = Duration::from_secs(2);

pub type ProgressFn = Arc<dyn Fn(IndexingProgress) + Send + Sync>;

pub struct PipelineOptions {
    pub force: bool,
    pub cancel: CancellationToken,
    pub on_progress: Option<ProgressFn>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            force: false,
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }
}

struct RunState {
    files_processed: AtomicUsize,
    files_skipped: AtomicUsize,
    chunks_indexed: AtomicUsize,
    snippets_indexed: AtomicUsize,
    chunks_embedded: AtomicUsize,
    chunks_reused: AtomicUsize,
    errors: AtomicUsize,
    total_files: usize,
    last_emit: Mutex<std::time::Instant>,
}

impl RunState {
    fn new(total_files: usize) -> Self {
        Self {
            files_processed: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            chunks_indexed: AtomicUsize::new(0),
            snippets_indexed: AtomicUsize::new(0),
            chunks_embedded: AtomicUsize::new(0),
            chunks_reused: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            total_files,
            last_emit: Mutex::new(std::time::Instant::now()),
        }
    }

    fn snapshot(&self, phase: IndexingPhase, current_file: Option<String>) -> IndexingProgress {
        IndexingProgress {
            phase,
            files_processed: self.files_processed.load(Ordering::SeqCst),
            total_files: self.total_files,
            current_file,
            chunks_indexed: self.chunks_indexed.load(Ordering::SeqCst),
            snippets_indexed: self.snippets_indexed.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }

    fn report(&self) -> IndexReport {
        IndexReport {
            files_processed: self.files_processed.load(Ordering::SeqCst)
                - self.files_skipped.load(Ordering::SeqCst),
            files_skipped: self.files_skipped.load(Ordering::SeqCst),
            chunks_indexed: self.chunks_indexed.load(Ordering::SeqCst),
            snippets_indexed: self.snippets_indexed.load(Ordering::SeqCst),
            chunks_embedded: self.chunks_embedded.load(Ordering::SeqCst),
            chunks_reused: self.chunks_reused.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

/// Index every admissible file under `repo_root`.
pub async fn run_index(
    repo_root: &Path,
    cfg: &Config,
    manager: Arc<IndexManager>,
    batcher: Arc<EmbeddingBatcher>,
    opts: PipelineOptions,
) -> Result<IndexReport> {
    let scan = ScanOptions::from_config(repo_root, cfg);
    let entries = enumerate_files(&scan)?;
    let state = Arc::new(RunState::new(entries.len()));

    emit(&opts.on_progress, state.snapshot(IndexingPhase::Collecting, None));

    let bound = cfg.effective_concurrency().max(1);
    let mut pending = entries.into_iter();
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();

    let spawn_unit = |join_set: &mut JoinSet<Result<()>>, entry: FileEntry| {
        let manager = Arc::clone(&manager);
        let batcher = Arc::clone(&batcher);
        let state = Arc::clone(&state);
        let cancel = opts.cancel.clone();
        let on_progress = opts.on_progress.clone();
        let chunking = cfg.chunking.clone();
        let force = opts.force;
        join_set.spawn(async move {
            process_file(entry, manager, batcher, state, cancel, on_progress, chunking, force)
                .await
        });
    };

    for entry in pending.by_ref().take(bound) {
        spawn_unit(&mut join_set, entry);
    }

    let mut fatal: Option<EngineError> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_fatal() => {
                // Stop feeding work and let in-flight units wind down.
                opts.cancel.cancel();
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            Ok(Err(_)) => {
                state.errors.fetch_add(1, Ordering::SeqCst);
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "index work unit panicked");
                state.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        if fatal.is_none() {
            if let Some(entry) = pending.next() {
                spawn_unit(&mut join_set, entry);
            }
        }
    }

    if let Some(e) = fatal {
        emit(&opts.on_progress, state.snapshot(IndexingPhase::Failed, None));
        return Err(e);
    }
    if opts.cancel.is_cancelled() {
        emit(&opts.on_progress, state.snapshot(IndexingPhase::Failed, None));
        return Err(EngineError::Cancelled);
    }

    emit(&opts.on_progress, state.snapshot(IndexingPhase::Saving, None));
    batcher.flush().await?;
    manager.save().await?;

    emit(&opts.on_progress, state.snapshot(IndexingPhase::Completed, None));
    Ok(state.report())
}

/// The single-file slice of the pipeline; also the watcher's entry point.
pub async fn index_one_file(
    rel_path: &str,
    abs_path: &Path,
    manager: &IndexManager,
    batcher: &EmbeddingBatcher,
    chunking: &crate::config::ChunkingConfig,
    force: bool,
) -> Result<FileOutcome> {
    let raw = tokio::fs::read(abs_path).await?;
    if raw.contains(&0u8) {
        return Ok(FileOutcome::Skipped); // binary
    }
    let file_hash = chunker::xxh3_hex(&raw);

    if !force && !manager.needs_indexing(rel_path, &file_hash).await? {
        return Ok(FileOutcome::Skipped);
    }

    let content = String::from_utf8_lossy(&raw).into_owned();
    let parsed = {
        let rel = rel_path.to_string();
        let hash = file_hash.clone();
        let chunking = chunking.clone();
        tokio::task::spawn_blocking(move || chunker::chunk_file(&rel, &content, &hash, &chunking))
            .await
            .map_err(|e| EngineError::Store(format!("chunker task failed: {e}")))?
    };

    let output = match parsed {
        Ok(o) => o,
        Err(e @ (EngineError::ParseError { .. } | EngineError::ParseUnavailable(_))) => {
            tracing::debug!(path = rel_path, error = %e, "parse failed, recording empty");
            manager.record_empty(rel_path, &file_hash).await?;
            return Ok(FileOutcome::ParseFailed);
        }
        Err(e) => return Err(e),
    };

    let outcome = manager
        .reindex_with_change_detection(rel_path, &file_hash, output.chunks, |texts| async move {
            batcher.embed(texts).await
        })
        .await?;

    let snippet_count = if output.snippets.is_empty() {
        // Clears stale snippet rows from a previous parse of this path.
        manager.reindex_snippets(rel_path, vec![]).await?
    } else {
        manager.reindex_snippets(rel_path, output.snippets).await?
    };

    Ok(FileOutcome::Indexed {
        chunks: outcome.total_chunks,
        snippets: snippet_count,
        embedded: outcome.embedded_chunks,
        reused: outcome.reused_chunks,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped,
    /// Unparseable; recorded as indexed with zero chunks so it is not
    /// retried until its bytes change.
    ParseFailed,
    Indexed {
        chunks: usize,
        snippets: usize,
        embedded: usize,
        reused: usize,
    },
}

#[allow(clippy::too_many_arguments)]
async fn process_file(
    entry: FileEntry,
    manager: Arc<IndexManager>,
    batcher: Arc<EmbeddingBatcher>,
    state: Arc<RunState>,
    cancel: CancellationToken,
    on_progress: Option<ProgressFn>,
    chunking: crate::config::ChunkingConfig,
    force: bool,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let rel = entry.rel_path.to_string_lossy().replace('\\', "/");
    let result = index_one_file(&rel, &entry.abs_path, &manager, &batcher, &chunking, force).await;

    match &result {
        Ok(FileOutcome::Skipped) => {
            state.files_skipped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(FileOutcome::ParseFailed) => {
            state.errors.fetch_add(1, Ordering::SeqCst);
        }
        Ok(FileOutcome::Indexed {
            chunks,
            snippets,
            embedded,
            reused,
        }) => {
            state.chunks_indexed.fetch_add(*chunks, Ordering::SeqCst);
            state.snippets_indexed.fetch_add(*snippets, Ordering::SeqCst);
            state.chunks_embedded.fetch_add(*embedded, Ordering::SeqCst);
            state.chunks_reused.fetch_add(*reused, Ordering::SeqCst);
        }
        Err(_) => {}
    }

    let done = state.files_processed.fetch_add(1, Ordering::SeqCst) + 1;
    maybe_emit_progress(&state, &on_progress, done, Some(rel)).await;

    result.map(|_| ())
}

async fn maybe_emit_progress(
    state: &RunState,
    on_progress: &Option<ProgressFn>,
    done: usize,
    current_file: Option<String>,
) {
    let Some(cb) = on_progress else { return };

    let is_last = done == state.total_files;
    let on_count = done % PROGRESS_EVERY_FILES == 0;

    // Snapshot and emit under one lock so concurrent units cannot deliver
    // snapshots out of order (progress must be monotonic for observers).
    let mut last = state.last_emit.lock().await;
    let on_time = last.elapsed() >= PROGRESS_EVERY;
    if on_time {
        *last = std::time::Instant::now();
    }
    if is_last || on_count || on_time {
        cb(state.snapshot(IndexingPhase::Indexing, current_file));
    }
}

fn emit(on_progress: &Option<ProgressFn>, progress: IndexingProgress) {
    if let Some(cb) = on_progress {
        cb(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embed::{resolve_embedder, EmbeddingBatcher};
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    fn test_config(index_dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.index_path = index_dir.to_path_buf();
        cfg.embedding.provider = "hashed".to_string();
        cfg.embedding.dimension = 32;
        cfg.max_concurrent_tasks = 2;
        cfg
    }

    async fn build_engine(cfg: &Config) -> (Arc<IndexManager>, Arc<EmbeddingBatcher>) {
        let embedder = resolve_embedder(&cfg.embedding).unwrap();
        let manager = Arc::new(
            IndexManager::open(&cfg.index_path, embedder.dimension(), embedder.name()).unwrap(),
        );
        let batcher = Arc::new(EmbeddingBatcher::new(embedder, &cfg.embedding));
        (manager, batcher)
    }

    #[tokio::test]
    async fn full_run_indexes_then_skips_unchanged() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        write(repo.path(), "src/auth.rs", "pub fn authenticate() { verify(); }\n");
        write(repo.path(), "src/db.rs", "pub fn connect() {}\n");
        write(repo.path(), "README.md", "# Demo\n\nSome docs.\n");

        let cfg = test_config(index.path());
        let (manager, batcher) = build_engine(&cfg).await;

        let report = run_index(
            repo.path(),
            &cfg,
            Arc::clone(&manager),
            Arc::clone(&batcher),
            PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.files_processed, 3);
        assert_eq!(report.files_skipped, 0);
        assert!(report.chunks_indexed >= 2);
        assert!(report.snippets_indexed >= 1);
        assert_eq!(report.errors, 0);

        // Second run over unchanged bytes: everything skipped, nothing embedded.
        let report2 = run_index(
            repo.path(),
            &cfg,
            Arc::clone(&manager),
            Arc::clone(&batcher),
            PipelineOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report2.files_processed, 0);
        assert_eq!(report2.files_skipped, 3);
        assert_eq!(report2.chunks_embedded, 0);
    }

    #[tokio::test]
    async fn modified_file_reuses_unchanged_chunks() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        write(
            repo.path(),
            "src/lib.rs",
            "pub fn stable_one() { work(); }\n\npub fn will_change() { old_body(); }\n",
        );

        let cfg = test_config(index.path());
        let (manager, batcher) = build_engine(&cfg).await;
        run_index(repo.path(), &cfg, Arc::clone(&manager), Arc::clone(&batcher), PipelineOptions::default())
            .await
            .unwrap();

        write(
            repo.path(),
            "src/lib.rs",
            "pub fn stable_one() { work(); }\n\npub fn will_change() { new_body(); }\n",
        );
        let report = run_index(
            repo.path(),
            &cfg,
            Arc::clone(&manager),
            Arc::clone(&batcher),
            PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.files_processed, 1);
        assert!(report.chunks_reused >= 1, "unchanged chunk must be reused");
        assert!(report.chunks_embedded >= 1, "changed chunk must be re-embedded");
    }

    #[tokio::test]
    async fn pre_cancelled_run_fails_with_cancelled() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        write(repo.path(), "src/a.rs", "pub fn a() {}\n");

        let cfg = test_config(index.path());
        let (manager, batcher) = build_engine(&cfg).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_index(
            repo.path(),
            &cfg,
            manager,
            batcher,
            PipelineOptions {
                cancel,
                ..PipelineOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn progress_reaches_completion_and_is_monotonic() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        for i in 0..12 {
            write(repo.path(), &format!("src/f{i}.rs"), &format!("pub fn f{i}() {{}}\n"));
        }

        let cfg = test_config(index.path());
        let (manager, batcher) = build_engine(&cfg).await;

        let seen: Arc<std::sync::Mutex<Vec<IndexingProgress>>> =
            Arc::new(std::sync::Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        let opts = PipelineOptions {
            on_progress: Some(Arc::new(move |p| sink.lock().unwrap().push(p))),
            ..PipelineOptions::default()
        };

        run_index(repo.path(), &cfg, manager, batcher, opts).await.unwrap();

        let snapshots = seen.lock().unwrap();
        assert!(snapshots.iter().any(|p| p.phase == IndexingPhase::Completed));
        let processed: Vec<usize> = snapshots.iter().map(|p| p.files_processed).collect();
        assert!(processed.windows(2).all(|w| w[0] <= w[1]), "monotonic progress");
        assert_eq!(snapshots.last().unwrap().files_processed, 12);
    }

    #[tokio::test]
    async fn unreadable_root_is_structured_error() {
        let cfg = test_config(&PathBuf::from("/tmp/cq-definitely-missing-idx"));
        let (manager, batcher) = build_engine(&cfg).await;
        let err = run_index(
            Path::new("/definitely/missing/root"),
            &cfg,
            manager,
            batcher,
            PipelineOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized(_)));
    }
}
