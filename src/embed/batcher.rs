use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// EmbeddingBatcher — coalesces small embed calls into provider batches.
//
// Callers submit N texts and await their slice of the produced vectors.
// A single worker task accumulates submissions and flushes when any
// threshold trips:
//
//   count   queued texts  >= batch_size
//   age     oldest entry  >= batch_timeout
//   memory  queued bytes  >= batch_memory_limit
//
// The submission channel is bounded, which is the backpressure story: when
// the queue is full, submitters wait for the worker to drain it. A caller
// that drops its future before the batch starts is pruned at flush time;
// one that drops mid-flight simply never reads its reply.
// ---------------------------------------------------------------------------

struct Submission {
    texts: Vec<String>,
    bytes: usize,
    reply: oneshot::Sender<Result<Vec<Vec<f32>>>>,
}

enum Msg {
    Submit(Submission),
    Flush(oneshot::Sender<()>),
}

pub struct EmbeddingBatcher {
    tx: mpsc::Sender<Msg>,
    dimension: usize,
}

impl EmbeddingBatcher {
    pub fn new(embedder: Arc<dyn Embedder>, cfg: &EmbeddingConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Msg>(64);
        let dimension = embedder.dimension();
        let worker = Worker {
            embedder,
            batch_size: cfg.batch_size.max(1),
            timeout: Duration::from_millis(cfg.batch_timeout_ms.max(1)),
            byte_budget: cfg.batch_memory_limit_mb.max(1) * 1024 * 1024,
        };
        tokio::spawn(worker.run(rx));
        Self { tx, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `texts`, preserving order. The call coalesces with concurrent
    /// submitters into shared provider batches.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let bytes = texts.iter().map(String::len).sum();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Submit(Submission {
                texts,
                bytes,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| EngineError::EmbedderUnavailable("batcher worker gone".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::EmbedderUnavailable("batcher dropped request".into()))?
    }

    /// Force any queued submissions through and wait for them to complete.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Msg::Flush(ack_tx))
            .await
            .map_err(|_| EngineError::EmbedderUnavailable("batcher worker gone".into()))?;
        ack_rx
            .await
            .map_err(|_| EngineError::EmbedderUnavailable("batcher worker gone".into()))
    }
}

struct Worker {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    timeout: Duration,
    byte_budget: usize,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Msg>) {
        let mut pending: Vec<Submission> = Vec::new();
        let mut queued_texts = 0usize;
        let mut queued_bytes = 0usize;
        let mut deadline: Option<Instant> = None;

        loop {
            let msg = if let Some(at) = deadline {
                tokio::select! {
                    m = rx.recv() => Some(m),
                    _ = tokio::time::sleep_until(at) => None,
                }
            } else {
                Some(rx.recv().await)
            };

            match msg {
                // Deadline fired.
                None => {
                    self.flush(&mut pending).await;
                    queued_texts = 0;
                    queued_bytes = 0;
                    deadline = None;
                }
                // Channel closed: final flush, then stop.
                Some(None) => {
                    self.flush(&mut pending).await;
                    return;
                }
                Some(Some(Msg::Flush(ack))) => {
                    self.flush(&mut pending).await;
                    queued_texts = 0;
                    queued_bytes = 0;
                    deadline = None;
                    let _ = ack.send(());
                }
                Some(Some(Msg::Submit(sub))) => {
                    queued_texts += sub.texts.len();
                    queued_bytes += sub.bytes;
                    pending.push(sub);

                    if queued_texts >= self.batch_size || queued_bytes >= self.byte_budget {
                        self.flush(&mut pending).await;
                        queued_texts = 0;
                        queued_bytes = 0;
                        deadline = None;
                    } else if deadline.is_none() {
                        deadline = Some(Instant::now() + self.timeout);
                    }
                }
            }
        }
    }

    async fn flush(&self, pending: &mut Vec<Submission>) {
        // Prune callers that gave up before the batch started.
        pending.retain(|s| !s.reply.is_closed());
        if pending.is_empty() {
            return;
        }
        let batch: Vec<Submission> = std::mem::take(pending);

        let all_texts: Vec<String> = batch.iter().flat_map(|s| s.texts.iter().cloned()).collect();

        let mut result = self.embedder.embed(&all_texts).await;
        if let Err(e) = &result {
            if e.is_retriable() {
                tracing::warn!(error = %e, texts = all_texts.len(), "embed batch retrying once");
                result = self.embedder.embed(&all_texts).await;
            }
        }

        match result {
            Ok(vectors) if vectors.len() == all_texts.len() => {
                let mut offset = 0usize;
                for sub in batch {
                    let n = sub.texts.len();
                    let slice = vectors[offset..offset + n].to_vec();
                    offset += n;
                    let _ = sub.reply.send(Ok(slice));
                }
            }
            Ok(vectors) => {
                let msg = format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    all_texts.len()
                );
                for sub in batch {
                    let _ = sub.reply.send(Err(EngineError::EmbedderUnavailable(msg.clone())));
                }
            }
            Err(e) => {
                let msg = e.to_string();
                for sub in batch {
                    let _ = sub.reply.send(Err(EngineError::EmbedderUnavailable(msg.clone())));
                }
            }
        }
    }
}
