//! Deterministic feature-hashing embedder.
//!
//! Each lower-cased word and each of its boundary-padded character trigrams
//! (`boils` → `<bo`, `boi`, `oil`, `ils`, `ls>`) is hashed into a fixed number
//! of buckets; the term-frequency vector is L2-normalised. Trigrams let
//! inflected forms ("boils", "boiling") land near each other without a model.

use async_trait::async_trait;
use std::collections::HashMap;

use super::EmbeddingProvider;
use crate::error::Result;

pub(crate) const DEFAULT_DIMS: usize = 1024;

pub struct HashedProvider {
    dims: usize,
}

impl HashedProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<String, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(format!("w:{}", word)).or_insert(0) += 1;

            let padded: Vec<char> = format!("<{}>", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                *tf.entry(format!("g:{}", gram)).or_insert(0) += 1;
            }
        }

        for (feature, count) in &tf {
            let idx = djb2(feature) % self.dims;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedProvider {
    fn model_name(&self) -> &str {
        "hashed-trigram"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}
