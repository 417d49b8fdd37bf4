use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embed::EmbeddingBatcher;
use crate::error::Result;
use crate::index_manager::IndexManager;
use crate::pipeline::{index_one_file, FileOutcome};
use crate::scanner::ScanOptions;

// ---------------------------------------------------------------------------
// IncrementalIndexer — filesystem events in, chunk-level deltas out.
//
// notify delivers raw events; the mini-debouncer coalesces per path inside
// the configured window, which gives the required semantics for free:
// repeated modifies collapse to one settled event, and create-then-delete
// settles to a path that no longer exists and has no index record (no-op).
//
// A settled path that exists runs the single-file pipeline slice; one that
// does not triggers the file's removal from both stores. The enumerator's
// admission rules filter non-source paths before any work happens.
// ---------------------------------------------------------------------------

/// Running totals for one watch session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherStats {
    pub files_created: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<WatchEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    pub path: String,
    pub action: &'static str,
    pub at: DateTime<Utc>,
}

struct WatcherCore {
    repo_root: PathBuf,
    scan: ScanOptions,
    chunking: crate::config::ChunkingConfig,
    manager: Arc<IndexManager>,
    batcher: Arc<EmbeddingBatcher>,
    stats: Mutex<WatcherStats>,
}

impl WatcherCore {
    /// Handle one settled (post-debounce) event for an absolute path.
    async fn apply_event(&self, abs_path: &Path) {
        let Ok(rel) = abs_path.strip_prefix(&self.repo_root) else {
            return;
        };
        if !self.scan.admits(rel) {
            return;
        }
        let rel_str = rel.to_string_lossy().replace('\\', "/");

        match tokio::fs::metadata(abs_path).await {
            Ok(meta) if meta.is_file() => {
                if meta.len() > self.scan.max_file_bytes {
                    return;
                }
                self.upsert(&rel_str, abs_path).await;
            }
            Ok(_) => {} // directory event; children arrive separately
            Err(_) => self.delete(&rel_str).await,
        }
    }

    async fn upsert(&self, rel: &str, abs: &Path) {
        let created = match self.manager.file_record(rel).await {
            Ok(record) => record.is_none(),
            Err(e) => {
                tracing::warn!(path = rel, error = %e, "record lookup failed");
                self.bump(|s| s.errors += 1);
                return;
            }
        };
        let prior_chunks = match self.manager.get_by_path(rel).await {
            Ok(c) => c.len(),
            Err(_) => 0,
        };

        match index_one_file(rel, abs, &self.manager, &self.batcher, &self.chunking, false).await {
            Ok(FileOutcome::Skipped) => {} // unchanged bytes or binary
            Ok(FileOutcome::ParseFailed) => {
                self.bump(|s| s.errors += 1);
            }
            Ok(FileOutcome::Indexed { chunks, .. }) => {
                let action = if created { "created" } else { "modified" };
                self.bump(|s| {
                    if created {
                        s.files_created += 1;
                    } else {
                        s.files_modified += 1;
                        s.chunks_removed += prior_chunks;
                    }
                    s.chunks_added += chunks;
                    s.last_event = Some(WatchEvent {
                        path: rel.to_string(),
                        action,
                        at: Utc::now(),
                    });
                });
                tracing::debug!(path = rel, chunks, action, "watch upsert");
            }
            Err(e) => {
                tracing::warn!(path = rel, error = %e, "watch reindex failed");
                self.bump(|s| s.errors += 1);
            }
        }
    }

    async fn delete(&self, rel: &str) {
        let prior_chunks = match self.manager.get_by_path(rel).await {
            Ok(c) => c.len(),
            Err(_) => 0,
        };
        let had_record = matches!(self.manager.file_record(rel).await, Ok(Some(_)));
        if prior_chunks == 0 && !had_record {
            // Created and deleted inside the debounce window.
            return;
        }

        match self.manager.remove_file(rel).await {
            Ok(()) => {
                self.bump(|s| {
                    s.files_deleted += 1;
                    s.chunks_removed += prior_chunks;
                    s.last_event = Some(WatchEvent {
                        path: rel.to_string(),
                        action: "deleted",
                        at: Utc::now(),
                    });
                });
                tracing::debug!(path = rel, prior_chunks, "watch delete");
            }
            Err(e) => {
                tracing::warn!(path = rel, error = %e, "watch delete failed");
                self.bump(|s| s.errors += 1);
            }
        }
    }

    fn bump(&self, f: impl FnOnce(&mut WatcherStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }
}

pub struct IncrementalIndexer {
    core: Arc<WatcherCore>,
    cancel: CancellationToken,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    task: Option<tokio::task::JoinHandle<()>>,
    debounce: Duration,
}

impl IncrementalIndexer {
    pub fn new(
        repo_root: &Path,
        cfg: &Config,
        manager: Arc<IndexManager>,
        batcher: Arc<EmbeddingBatcher>,
    ) -> Self {
        Self {
            core: Arc::new(WatcherCore {
                repo_root: repo_root.to_path_buf(),
                scan: ScanOptions::from_config(repo_root, cfg),
                chunking: cfg.chunking.clone(),
                manager,
                batcher,
                stats: Mutex::new(WatcherStats::default()),
            }),
            cancel: CancellationToken::new(),
            debouncer: None,
            task: None,
            debounce: Duration::from_millis(cfg.watch_debounce_ms.max(1)),
        }
    }

    /// Begin watching the repository root recursively.
    pub fn start(&mut self) -> Result<()> {
        let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.debounce, std_tx)
            .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e)))?;
        debouncer
            .watcher()
            .watch(&self.core.repo_root, RecursiveMode::Recursive)
            .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e)))?;

        // Bridge the blocking debouncer channel onto the runtime.
        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        std::thread::Builder::new()
            .name("codequarry-watch-bridge".to_string())
            .spawn(move || {
                while let Ok(result) = std_rx.recv() {
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(crate::error::EngineError::Io)?;

        let core = Arc::clone(&self.core);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        None => break,
                        Some(Ok(events)) => {
                            for event in events {
                                core.apply_event(&event.path).await;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "watch backend error");
                            core.bump(|s| s.errors += 1);
                        }
                    },
                }
            }
        });

        self.debouncer = Some(debouncer);
        self.task = Some(task);
        tracing::info!(root = %self.core.repo_root.display(), debounce_ms = self.debounce.as_millis() as u64, "watch started");
        Ok(())
    }

    /// Stop watching: release the OS watcher, quiesce in-flight work, save.
    pub async fn stop(&mut self) -> Result<()> {
        // Dropping the debouncer releases inotify/FSEvents resources and
        // disconnects the bridge thread.
        self.debouncer = None;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.core.manager.save().await?;
        tracing::info!("watch stopped");
        Ok(())
    }

    pub fn stats(&self) -> WatcherStats {
        self.core
            .stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Test/diagnostic entry: feed one settled event through the same path
    /// the watcher loop uses.
    pub async fn apply_event(&self, abs_path: &Path) {
        self.core.apply_event(abs_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::resolve_embedder;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    async fn watcher_fixture(
        repo: &Path,
        index: &Path,
    ) -> (IncrementalIndexer, Arc<IndexManager>) {
        let mut cfg = Config::default();
        cfg.index_path = index.to_path_buf();
        cfg.embedding.provider = "hashed".to_string();
        cfg.embedding.dimension = 32;

        let embedder = resolve_embedder(&cfg.embedding).unwrap();
        let manager = Arc::new(
            IndexManager::open(&cfg.index_path, embedder.dimension(), embedder.name()).unwrap(),
        );
        let batcher = Arc::new(EmbeddingBatcher::new(embedder, &cfg.embedding));
        let indexer = IncrementalIndexer::new(repo, &cfg, Arc::clone(&manager), batcher);
        (indexer, manager)
    }

    #[tokio::test]
    async fn create_modify_delete_cycle_updates_stores_and_stats() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let (indexer, manager) = watcher_fixture(repo.path(), index.path()).await;

        // Created.
        write(repo.path(), "src/auth.rs", "pub fn authenticate() {}\n");
        indexer.apply_event(&repo.path().join("src/auth.rs")).await;
        assert_eq!(indexer.stats().files_created, 1);
        assert!(!manager.get_by_path("src/auth.rs").await.unwrap().is_empty());

        // Modified.
        write(repo.path(), "src/auth.rs", "pub fn authenticate() { v2(); }\n");
        indexer.apply_event(&repo.path().join("src/auth.rs")).await;
        let stats = indexer.stats();
        assert_eq!(stats.files_modified, 1);
        assert!(stats.chunks_added >= 2);
        assert_eq!(stats.last_event.as_ref().unwrap().action, "modified");

        // Deleted.
        std::fs::remove_file(repo.path().join("src/auth.rs")).unwrap();
        indexer.apply_event(&repo.path().join("src/auth.rs")).await;
        let stats = indexer.stats();
        assert_eq!(stats.files_deleted, 1);
        assert!(stats.chunks_removed >= 1);
        assert!(manager.get_by_path("src/auth.rs").await.unwrap().is_empty());
        assert!(manager.verify_parity("src/auth.rs").await.unwrap());
    }

    #[tokio::test]
    async fn settled_event_for_never_indexed_missing_path_is_noop() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let (indexer, _manager) = watcher_fixture(repo.path(), index.path()).await;

        // Create-then-delete inside the window settles to a missing path.
        indexer.apply_event(&repo.path().join("src/ghost.rs")).await;
        let stats = indexer.stats();
        assert_eq!(stats.files_deleted, 0);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn non_source_paths_are_ignored() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let (indexer, manager) = watcher_fixture(repo.path(), index.path()).await;

        write(repo.path(), "node_modules/x/index.js", "junk();\n");
        indexer
            .apply_event(&repo.path().join("node_modules/x/index.js"))
            .await;
        write(repo.path(), "data.bin", "\u{1}\u{2}");
        indexer.apply_event(&repo.path().join("data.bin")).await;

        assert_eq!(indexer.stats().files_created, 0);
        assert_eq!(manager.statistics().await.unwrap().file_count, 0);
    }

    #[tokio::test]
    async fn unchanged_rewrite_is_not_counted() {
        let repo = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let (indexer, _manager) = watcher_fixture(repo.path(), index.path()).await;

        write(repo.path(), "src/a.rs", "pub fn a() {}\n");
        indexer.apply_event(&repo.path().join("src/a.rs")).await;
        // Touch with identical bytes: change detection skips it.
        write(repo.path(), "src/a.rs", "pub fn a() {}\n");
        indexer.apply_event(&repo.path().join("src/a.rs")).await;

        let stats = indexer.stats();
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.files_modified, 0);
    }
}
