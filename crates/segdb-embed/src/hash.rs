use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use segdb_core::traits::Embedder;
use segdb_core::Result;

/// Feature-hashing embedder for tests and offline runs.
///
/// Each lowercased alphanumeric word lands in one bucket, so texts sharing
/// words have positive cosine similarity. Output is L2 normalised unless the
/// text has no words, in which case the zero vector is returned.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    id: String,
    dim: usize,
    max_len: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize, max_len: usize) -> Self {
        let dim = dim.max(1);
        Self { id: format!("hash:d{dim}"), dim, max_len }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .take(self.max_len);
        for (i, word) in words.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            word.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + 0.5 * val + (i as f32 % 3.0) * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
