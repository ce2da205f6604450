use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use segdb_core::traits::Embedder;
use segdb_core::{Error, Result};

type CacheKey = [u8; 32];

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, Arc<Vec<f32>>>,
    order: VecDeque<CacheKey>,
}

/// Bounded memo of embeddings keyed by a blake3 digest of the text. Oldest entries go first.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    capacity: usize,
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self { inner, capacity, entries: Mutex::new(Entries::default()), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, text: &str) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.inner.id().as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    fn insert(&self, key: CacheKey, value: Arc<Vec<f32>>) {
        let mut entries = self.entries.lock();
        if entries.map.insert(key, value).is_none() {
            entries.order.push_back(key);
        }
        while entries.map.len() > self.capacity {
            match entries.order.pop_front() {
                Some(old) => {
                    entries.map.remove(&old);
                }
                None => break,
            }
        }
    }
}

impl Embedder for CachedEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.capacity == 0 {
            return self.inner.embed_batch(texts);
        }
        let keys: Vec<CacheKey> = texts.iter().map(|t| self.key(t)).collect();
        let mut out: Vec<Option<Arc<Vec<f32>>>> = {
            let entries = self.entries.lock();
            keys.iter().map(|k| entries.map.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = out.iter().enumerate().filter(|(_, v)| v.is_none()).map(|(i, _)| i).collect();
        self.hits.fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch)?;
            if fresh.len() != batch.len() {
                return Err(Error::Embedding(format!("provider returned {} vectors for {} texts", fresh.len(), batch.len())));
            }
            for (i, vector) in missing.into_iter().zip(fresh) {
                let vector = Arc::new(vector);
                self.insert(keys[i], Arc::clone(&vector));
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.map(|v| v.as_ref().clone()).unwrap_or_default()).collect())
    }
}
