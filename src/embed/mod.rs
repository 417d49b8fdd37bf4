use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

mod batcher;
mod hashed;
mod model2vec;

pub use batcher::EmbeddingBatcher;
pub use hashed::HashedEmbedder;
pub use model2vec::Model2VecEmbedder;

// ---------------------------------------------------------------------------
// Embedder — the engine's capability surface over embedding backends.
//
// The engine never embeds anything itself; it talks to whatever provider
// the configuration resolves. Providers are tried in order and the first
// one that comes up healthy wins, so a machine without the local model
// still indexes (with the hashed projection) instead of failing cold.
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output dimension; fixed for the provider's lifetime.
    fn dimension(&self) -> usize;

    /// Map texts to vectors, preserving positional correspondence.
    /// `result.len() == texts.len()` on success.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("name", &self.name())
            .field("dimension", &self.dimension())
            .finish()
    }
}

/// Resolve the configured provider, falling back along the chain
/// `configured → hashed`. An unknown provider name is an argument error,
/// not a fallback.
pub fn resolve_embedder(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match cfg.provider.as_str() {
        "model2vec" => match Model2VecEmbedder::load(&cfg.model) {
            Ok(m) => {
                if cfg.dimension != 0 && m.dimension() != cfg.dimension {
                    tracing::warn!(
                        model = %cfg.model,
                        model_dim = m.dimension(),
                        configured = cfg.dimension,
                        "embedding model dimension differs from configuration; using the model's"
                    );
                }
                Ok(Arc::new(m))
            }
            Err(e) => {
                tracing::warn!(model = %cfg.model, error = %e, "model2vec unavailable, using hashed embeddings");
                Ok(Arc::new(HashedEmbedder::new(cfg.dimension)))
            }
        },
        "hashed" => Ok(Arc::new(HashedEmbedder::new(cfg.dimension))),
        other => Err(EngineError::InvalidArgument(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}
