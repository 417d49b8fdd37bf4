use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::types::IndexingProgress;

// ---------------------------------------------------------------------------
// TaskManager — long-running jobs behind a poll-and-cancel surface.
//
// The task table is a single-writer map under a mutex; awaiters park on a
// per-task watch channel that fires once, on the terminal transition.
// Status moves monotonically: after completed/failed/cancelled, further
// updates are rejected as no-ops. A TTL timer cancels tasks that are
// still working when it fires; cleanup evicts terminal tasks by age.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

struct TaskEntry {
    task: Task,
    progress: Option<IndexingProgress>,
    result: Option<serde_json::Value>,
    cancel: CancellationToken,
    work: Option<AbortHandle>,
    done_tx: watch::Sender<bool>,
}

impl TaskEntry {
    fn mark_terminal(&mut self, status: TaskStatus, message: Option<String>) {
        self.task.status = status;
        if message.is_some() {
            self.task.status_message = message;
        }
        self.task.last_updated_at = Utc::now();
        if status == TaskStatus::Cancelled {
            self.cancel.cancel();
            if let Some(work) = &self.work {
                work.abort();
            }
        }
        // send_replace stores the flag even with no subscribers yet, so a
        // late awaiter still observes the terminal state immediately.
        self.done_tx.send_replace(true);
    }
}

#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_id: AtomicU64,
    /// Weak self-handle so TTL timers can reach the table without keeping
    /// the manager alive.
    self_ref: std::sync::OnceLock<std::sync::Weak<TaskManager>>,
}

impl TaskManager {
    pub fn new() -> Arc<Self> {
        let manager = Arc::new(Self::default());
        let _ = manager.self_ref.set(Arc::downgrade(&manager));
        manager
    }

    /// Register a task in `working` state. With a TTL, a timer cancels it
    /// if it has not reached a terminal state by then.
    pub fn create(&self, ttl_ms: Option<u64>, poll_interval_ms: Option<u64>) -> Task {
        let id = format!("task-{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let now = Utc::now();
        let task = Task {
            task_id: id.clone(),
            status: TaskStatus::Working,
            status_message: None,
            created_at: now,
            last_updated_at: now,
            ttl_ms,
            poll_interval_ms,
        };

        let (done_tx, _) = watch::channel(false);
        let entry = TaskEntry {
            task: task.clone(),
            progress: None,
            result: None,
            cancel: CancellationToken::new(),
            work: None,
            done_tx,
        };
        self.lock().insert(id.clone(), entry);

        if let Some(ttl) = ttl_ms {
            let weak = self.self_ref.get().cloned();
            let task_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ttl)).await;
                if let Some(manager) = weak.and_then(|w| w.upgrade()) {
                    manager.expire_if_working(&task_id);
                }
            });
        }

        task
    }

    /// Attach the background work driving this task so `cancel` can abort it.
    pub fn attach_work(&self, id: &str, work: AbortHandle) -> Result<()> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.work = Some(work);
        Ok(())
    }

    /// Non-terminal status update. Returns `false` (no-op) once terminal.
    pub fn update_status(&self, id: &str, status: TaskStatus, message: Option<String>) -> Result<bool> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        if status.is_terminal() {
            entry.mark_terminal(status, message);
        } else {
            entry.task.status = status;
            entry.task.status_message = message;
            entry.task.last_updated_at = Utc::now();
        }
        Ok(true)
    }

    pub fn update_progress(&self, id: &str, progress: IndexingProgress) -> Result<bool> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        entry.progress = Some(progress);
        entry.task.last_updated_at = Utc::now();
        Ok(true)
    }

    /// Store the terminal result and complete the task. At most one result
    /// is ever stored; a second call is a no-op.
    pub fn store_result(&self, id: &str, result: serde_json::Value) -> Result<bool> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        entry.result = Some(result);
        entry.mark_terminal(TaskStatus::Completed, None);
        Ok(true)
    }

    pub fn fail(&self, id: &str, message: String) -> Result<bool> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        entry.mark_terminal(TaskStatus::Failed, Some(message));
        Ok(true)
    }

    /// Cancel: set the token, abort attached work, wake awaiters.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.task.status.is_terminal() {
            return Ok(false);
        }
        entry.mark_terminal(TaskStatus::Cancelled, Some("cancelled by caller".into()));
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        let tasks = self.lock();
        tasks
            .get(id)
            .map(|e| e.task.clone())
            .ok_or_else(|| not_found(id))
    }

    pub fn get_progress(&self, id: &str) -> Result<Option<IndexingProgress>> {
        let tasks = self.lock();
        tasks
            .get(id)
            .map(|e| e.progress.clone())
            .ok_or_else(|| not_found(id))
    }

    pub fn get_result(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let tasks = self.lock();
        tasks
            .get(id)
            .map(|e| e.result.clone())
            .ok_or_else(|| not_found(id))
    }

    pub fn get_cancellation_token(&self, id: &str) -> Result<CancellationToken> {
        let tasks = self.lock();
        tasks
            .get(id)
            .map(|e| e.cancel.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Page through tasks by creation time then id; `cursor` is the last
    /// task id of the previous page.
    pub fn list(&self, cursor: Option<&str>, limit: usize) -> (Vec<Task>, Option<String>) {
        let tasks = self.lock();
        let mut all: Vec<&TaskEntry> = tasks.values().collect();
        all.sort_by(|a, b| {
            a.task
                .created_at
                .cmp(&b.task.created_at)
                .then_with(|| a.task.task_id.cmp(&b.task.task_id))
        });

        let start = match cursor {
            Some(c) => all
                .iter()
                .position(|e| e.task.task_id == c)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };

        let page: Vec<Task> = all
            .iter()
            .skip(start)
            .take(limit.max(1))
            .map(|e| e.task.clone())
            .collect();
        let next = if start + page.len() < all.len() {
            page.last().map(|t| t.task_id.clone())
        } else {
            None
        };
        (page, next)
    }

    /// Park until the task reaches a terminal state, then deliver its
    /// outcome: the stored result, or a structured failure for
    /// failed/cancelled/resultless tasks. Each awaiter gets one outcome.
    pub async fn await_task(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let mut done_rx = {
            let tasks = self.lock();
            let entry = tasks.get(id).ok_or_else(|| not_found(id))?;
            entry.done_tx.subscribe()
        };

        let wait = async {
            loop {
                if *done_rx.borrow() {
                    return Ok::<(), EngineError>(());
                }
                done_rx
                    .changed()
                    .await
                    .map_err(|_| not_found(id))?;
            }
        };

        match timeout {
            Some(t) => tokio::time::timeout(t, wait)
                .await
                .map_err(|_| EngineError::ProviderTimeout(t.as_millis() as u64))??,
            None => wait.await?,
        }

        let tasks = self.lock();
        let entry = tasks.get(id).ok_or_else(|| not_found(id))?;
        match entry.task.status {
            TaskStatus::Completed => entry.result.clone().ok_or(EngineError::NoResult),
            TaskStatus::Failed => Err(EngineError::TaskFailed(
                entry
                    .task
                    .status_message
                    .clone()
                    .unwrap_or_else(|| "task failed".into()),
            )),
            TaskStatus::Cancelled => Err(EngineError::Cancelled),
            // Unreachable once the watch fired, but total anyway.
            _ => Err(EngineError::NoResult),
        }
    }

    /// Evict terminal tasks whose last update is older than `older_than`.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, e| !(e.task.status.is_terminal() && e.task.last_updated_at < cutoff));
        before - tasks.len()
    }

    fn expire_if_working(&self, id: &str) {
        let mut tasks = self.lock();
        if let Some(entry) = tasks.get_mut(id) {
            if !entry.task.status.is_terminal() {
                tracing::debug!(task = id, "ttl expired, cancelling");
                entry.mark_terminal(TaskStatus::Cancelled, Some("ttl expired".into()));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn not_found(id: &str) -> EngineError {
    EngineError::TaskNotFound(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn result_delivery_and_monotonic_terminal_state() {
        let tm = TaskManager::new();
        let task = tm.create(None, Some(100));
        assert_eq!(task.status, TaskStatus::Working);

        assert!(tm.store_result(&task.task_id, json!({"files": 3})).unwrap());
        assert_eq!(tm.get(&task.task_id).unwrap().status, TaskStatus::Completed);

        // Terminal is terminal: everything after is a no-op.
        assert!(!tm.update_status(&task.task_id, TaskStatus::Working, None).unwrap());
        assert!(!tm.fail(&task.task_id, "late".into()).unwrap());
        assert!(!tm.cancel(&task.task_id).unwrap());
        assert_eq!(tm.get(&task.task_id).unwrap().status, TaskStatus::Completed);

        let result = tm.await_task(&task.task_id, None).await.unwrap();
        assert_eq!(result["files"], 3);
    }

    #[tokio::test]
    async fn concurrent_awaiters_all_receive_the_same_outcome() {
        let tm = TaskManager::new();
        let task = tm.create(None, None);
        let id = task.task_id.clone();

        let a = {
            let tm = Arc::clone(&tm);
            let id = id.clone();
            tokio::spawn(async move { tm.await_task(&id, None).await })
        };
        let b = {
            let tm = Arc::clone(&tm);
            let id = id.clone();
            tokio::spawn(async move { tm.await_task(&id, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tm.store_result(&id, json!("done")).unwrap();

        assert_eq!(a.await.unwrap().unwrap(), json!("done"));
        assert_eq!(b.await.unwrap().unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn cancel_wakes_awaiters_with_cancellation() {
        let tm = TaskManager::new();
        let task = tm.create(None, None);
        let id = task.task_id.clone();

        let awaiter = {
            let tm = Arc::clone(&tm);
            let id = id.clone();
            tokio::spawn(async move { tm.await_task(&id, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(tm.cancel(&id).unwrap());
        assert!(matches!(awaiter.await.unwrap().unwrap_err(), EngineError::Cancelled));
        assert!(tm.get_cancellation_token(&id).unwrap().is_cancelled());
        assert!(tm.get_result(&id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_cancels_tasks_still_working() {
        let tm = TaskManager::new();
        let task = tm.create(Some(500), Some(100));

        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(tm.get(&task.task_id).unwrap().status, TaskStatus::Working);

        tokio::time::advance(Duration::from_millis(300)).await;
        // Let the timer task run.
        tokio::task::yield_now().await;
        assert_eq!(tm.get(&task.task_id).unwrap().status, TaskStatus::Cancelled);
        assert!(tm.get_result(&task.task_id).unwrap().is_none());
        assert!(matches!(
            tm.await_task(&task.task_id, None).await.unwrap_err(),
            EngineError::Cancelled
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_does_not_touch_completed_tasks() {
        let tm = TaskManager::new();
        let task = tm.create(Some(200), None);
        tm.store_result(&task.task_id, json!(1)).unwrap();

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(tm.get(&task.task_id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn await_with_timeout_elapses() {
        let tm = TaskManager::new();
        let task = tm.create(None, None);
        let err = tm
            .await_task(&task.task_id, Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderTimeout(_)));
    }

    #[tokio::test]
    async fn progress_updates_only_while_live() {
        let tm = TaskManager::new();
        let task = tm.create(None, None);

        let p = IndexingProgress::starting(10);
        assert!(tm.update_progress(&task.task_id, p.clone()).unwrap());
        assert_eq!(tm.get_progress(&task.task_id).unwrap().unwrap().total_files, 10);

        tm.fail(&task.task_id, "boom".into()).unwrap();
        assert!(!tm.update_progress(&task.task_id, p).unwrap());

        let err = tm.await_task(&task.task_id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskFailed(_)));
    }

    #[tokio::test]
    async fn list_pages_in_creation_order() {
        let tm = TaskManager::new();
        let t1 = tm.create(None, None);
        let t2 = tm.create(None, None);
        let t3 = tm.create(None, None);

        let (page1, cursor) = tm.list(None, 2);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].task_id, t1.task_id);
        assert_eq!(page1[1].task_id, t2.task_id);
        let cursor = cursor.unwrap();

        let (page2, cursor2) = tm.list(Some(&cursor), 2);
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].task_id, t3.task_id);
        assert!(cursor2.is_none());
    }

    #[tokio::test]
    async fn cleanup_evicts_only_old_terminal_tasks() {
        let tm = TaskManager::new();
        let done = tm.create(None, None);
        let live = tm.create(None, None);
        tm.store_result(&done.task_id, json!(null)).unwrap();

        // Nothing is old enough yet.
        assert_eq!(tm.cleanup(Duration::from_secs(60)), 0);

        // Zero-age cutoff evicts the terminal task but never the live one.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tm.cleanup(Duration::from_millis(0)), 1);
        assert!(matches!(tm.get(&done.task_id), Err(EngineError::TaskNotFound(_))));
        assert!(tm.get(&live.task_id).is_ok());
    }

    #[tokio::test]
    async fn unknown_task_is_task_not_found() {
        let tm = TaskManager::new();
        assert!(matches!(tm.get("task-missing"), Err(EngineError::TaskNotFound(_))));
        assert!(matches!(
            tm.await_task("task-missing", None).await.unwrap_err(),
            EngineError::TaskNotFound(_)
        ));
    }
}
