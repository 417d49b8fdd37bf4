use async_trait::async_trait;

use super::Embedder;
use crate::error::Result;

// ---------------------------------------------------------------------------
// HashedEmbedder — deterministic feature-hashing projection.
//
// The classic hashing trick: every token (and adjacent token bigram, for a
// little word-order signal) is xxh3-hashed into one of D buckets with a
// ±1 sign bit, and the resulting bag vector is L2-normalized. No model
// download, no network, bit-identical across runs and platforms — the
// always-available tail of the provider chain and the embedder the test
// suite runs on.
// ---------------------------------------------------------------------------

pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];

        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        for token in &tokens {
            bump(&mut v, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            bump(&mut v, format!("{}\u{1}{}", pair[0], pair[1]).as_bytes());
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn bump(v: &mut [f32], feature: &[u8]) {
    let h = xxhash_rust::xxh3::xxh3_64(feature);
    let idx = (h % v.len() as u64) as usize;
    let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
    v[idx] += sign;
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn name(&self) -> &'static str {
        "hashed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
