use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use segdb_core::storage::{self, ArtifactHeader};
use segdb_core::traits::{Embedder, RetrievalEngine};
use segdb_core::types::{ArtifactKind, Document, SearchHit, SourceKind};
use segdb_core::{Error, Result};

const EMBED_BATCH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    embedding: Vec<f32>,
    document: Document,
}

#[derive(Serialize, Deserialize)]
struct VectorBody {
    dim: usize,
    embedder_id: String,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStats {
    pub count: usize,
    pub dim: usize,
    pub embedder_id: String,
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<Entry>,
    loaded: bool,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder, entries: Vec::new(), loaded: false }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn stats(&self) -> VectorStats {
        VectorStats { count: self.entries.len(), dim: self.embedder.dim(), embedder_id: self.embedder.id().to_string() }
    }

    fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!("provider returned {} vectors for {} texts", vectors.len(), texts.len())));
        }
        let dim = self.embedder.dim();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::Embedding(format!("provider returned dimension {}, expected {dim}", bad.len())));
        }
        Ok(vectors)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

impl RetrievalEngine for VectorIndex {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.loaded = false;
    }

    fn add(&mut self, documents: &[Document]) -> Result<()> {
        let mut fresh = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(EMBED_BATCH) {
            let texts: Vec<String> = chunk.iter().map(|d| d.text.clone()).collect();
            let vectors = self.embed_checked(&texts)?;
            fresh.extend(vectors.into_iter().zip(chunk).map(|(embedding, doc)| Entry { embedding, document: doc.clone() }));
            debug!(embedded = fresh.len(), total = documents.len(), "vector add progress");
        }
        self.entries.extend(fresh);
        self.loaded = true;
        Ok(())
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if !self.loaded {
            return Err(Error::NotLoaded("vector"));
        }
        if top_k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embed_checked(&[query.to_string()])?.remove(0);

        let mut scored: Vec<(usize, f32)> =
            self.entries.iter().enumerate().map(|(i, e)| (i, cosine(&query_vec, &e.embedding))).collect();
        // stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchHit {
                position,
                document: self.entries[position].document.clone(),
                score,
                source: SourceKind::Vector,
            })
            .collect())
    }

    fn save(&self, path: &Path, header: &ArtifactHeader) -> Result<()> {
        let body = VectorBody {
            dim: self.embedder.dim(),
            embedder_id: self.embedder.id().to_string(),
            entries: self.entries.clone(),
        };
        storage::write_artifact(path, header, &body)
    }

    fn load(&mut self, path: &Path) -> Result<ArtifactHeader> {
        let (header, body): (ArtifactHeader, VectorBody) = storage::read_artifact(path)?;
        let dim = self.embedder.dim();
        if body.dim != dim {
            return Err(Error::Configuration(format!(
                "vector artifact {} has dimension {}, provider '{}' produces {dim}",
                path.display(),
                body.dim,
                self.embedder.id()
            )));
        }
        if body.entries.iter().any(|e| e.embedding.len() != dim) {
            return Err(Error::Serialization(format!("vector artifact {} has malformed embeddings", path.display())));
        }
        if body.entries.len() != header.document_count {
            return Err(Error::Serialization(format!(
                "vector artifact {} holds {} entries, header says {}",
                path.display(),
                body.entries.len(),
                header.document_count
            )));
        }
        if body.embedder_id != self.embedder.id() {
            warn!(stored = %body.embedder_id, current = %self.embedder.id(), "vector artifact built by a different embedder");
        }
        self.entries = body.entries;
        self.loaded = true;
        Ok(header)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
