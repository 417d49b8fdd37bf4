use async_trait::async_trait;
use model2vec_rs::model::StaticModel;
use tokio::sync::{mpsc, oneshot};

use super::Embedder;
use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Model2VecEmbedder — local static embeddings via Model2Vec-RS.
//
// The model handle is not Send, so it lives on a dedicated worker thread
// and the embedder proxies requests over a channel. Encoding is CPU-bound
// and already batched upstream; one worker is the right amount of
// parallelism for a static model.
// ---------------------------------------------------------------------------

type Job = (Vec<String>, oneshot::Sender<Vec<Vec<f32>>>);

pub struct Model2VecEmbedder {
    tx: mpsc::UnboundedSender<Job>,
    dimension: usize,
}

impl Model2VecEmbedder {
    /// Download/open the model and probe its output dimension. Fails when
    /// the model cannot be resolved (offline machine without a cache).
    pub fn load(model_id: &str) -> Result<Self> {
        let (init_tx, init_rx) = std::sync::mpsc::channel::<std::result::Result<usize, String>>();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let model_id_owned = model_id.to_string();
        std::thread::Builder::new()
            .name("model2vec-embed".to_string())
            .spawn(move || {
                let model = match StaticModel::from_pretrained(&model_id_owned, None, None, None) {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = init_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let dimension = model.encode_single("dimension probe").len();
                let _ = init_tx.send(Ok(dimension));

                while let Some((texts, reply)) = rx.blocking_recv() {
                    let vectors = texts.iter().map(|t| model.encode_single(t)).collect();
                    let _ = reply.send(vectors);
                }
            })
            .map_err(|e| EngineError::EmbedderUnavailable(format!("worker spawn: {e}")))?;

        let dimension = init_rx
            .recv()
            .map_err(|_| EngineError::EmbedderUnavailable("model worker died during init".into()))?
            .map_err(EngineError::EmbedderUnavailable)?;

        Ok(Self { tx, dimension })
    }
}

#[async_trait]
impl Embedder for Model2VecEmbedder {
    fn name(&self) -> &'static str {
        "model2vec"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((texts.to_vec(), reply_tx))
            .map_err(|_| EngineError::EmbedderUnavailable("model worker gone".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::EmbedderUnavailable("model worker dropped request".into()))
    }
}
