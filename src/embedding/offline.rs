//! Deterministic offline embedding backend.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::RagResult;
use crate::vector::math;

use super::Embedder;

/// Hash-seeded embedder with no external dependencies.
///
/// The same text always maps to the same unit vector, so pipelines can
/// run (and be tested) without a model server. Vectors carry no
/// semantics beyond equal-text equality.
#[derive(Debug, Clone)]
pub struct OfflineEmbedder {
    dimension: usize,
}

impl OfflineEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let text_hash = hasher.finish();

        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let bits = mix(text_hash.wrapping_add(i as u64));
            // Map to [-1, 1] before normalization.
            let value = (bits as f64 / u64::MAX as f64) * 2.0 - 1.0;
            vector.push(value as f32);
        }
        math::l2_normalize(&mut vector);
        vector
    }
}

/// splitmix64 finalizer; decorrelates adjacent seeds.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[async_trait]
impl Embedder for OfflineEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.encode_one(text)).collect())
    }
}
