//! One complete, immutable artifact set for a key.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use segdb_core::config::IndexSettings;
use segdb_core::storage::{self, ArtifactHeader};
use segdb_core::traits::{Embedder, PathResolver, RetrievalEngine};
use segdb_core::types::{ArtifactKind, Document, FusionMetadata, SearchHit, SearchMode, TenantKey};
use segdb_core::{Error, Result};
use segdb_text::{LexicalIndex, LexicalStats};
use segdb_vector::{VectorIndex, VectorStats};

use crate::fusion::{FusionRanker, FusionWeights};

/// Cooperative cancellation flag for long-running builds.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Canonical artifact paths of one key.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    vector: PathBuf,
    lexical: PathBuf,
    fusion: PathBuf,
}

impl ArtifactPaths {
    pub fn resolve(resolver: &dyn PathResolver, key: &TenantKey) -> Self {
        Self {
            vector: resolver.resolve_path(key, ArtifactKind::Vector),
            lexical: resolver.resolve_path(key, ArtifactKind::Lexical),
            fusion: resolver.resolve_path(key, ArtifactKind::Fusion),
        }
    }

    pub fn get(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Vector => &self.vector,
            ArtifactKind::Lexical => &self.lexical,
            ArtifactKind::Fusion => &self.fusion,
        }
    }
}

/// What the canonical files of a key look like right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Absent,
    Complete { generation: u64, document_count: usize },
    Partial,
}

/// Classify the canonical files by their headers only.
pub fn inspect(paths: &ArtifactPaths, key: &TenantKey) -> DiskState {
    let mut present = 0;
    let mut headers = Vec::with_capacity(ArtifactKind::ALL.len());
    for kind in ArtifactKind::ALL {
        let path = paths.get(kind);
        if !path.exists() {
            continue;
        }
        present += 1;
        match storage::read_header(path) {
            Ok(h) if h.kind == kind && h.belongs_to(key) => headers.push(h),
            Ok(h) => debug!(path = %path.display(), found = %h.kind, "artifact header does not match its slot"),
            Err(e) => debug!(path = %path.display(), error = %e, "unreadable artifact header"),
        }
    }
    if present == 0 {
        return DiskState::Absent;
    }
    if headers.len() != ArtifactKind::ALL.len() {
        return DiskState::Partial;
    }
    let first = &headers[0];
    let consistent =
        headers.iter().all(|h| h.generation == first.generation && h.document_count == first.document_count);
    if consistent {
        DiskState::Complete { generation: first.generation, document_count: first.document_count }
    } else {
        DiskState::Partial
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub tenant_id: String,
    pub collection_id: String,
    pub document_count: usize,
    pub generation: u64,
    pub metadata: FusionMetadata,
    pub vector: VectorStats,
    pub lexical: LexicalStats,
}

pub struct Generation {
    key: TenantKey,
    metadata: FusionMetadata,
    ranker: FusionRanker,
    vector: VectorIndex,
    lexical: LexicalIndex,
}

impl Generation {
    /// Populate fresh engines from `documents`; nothing touches disk.
    pub fn build(
        key: &TenantKey,
        documents: &[Document],
        settings: &IndexSettings,
        embedder: Arc<dyn Embedder>,
        generation: u64,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let weights = FusionWeights::new(settings.vector_weight, settings.lexical_weight)?;
        let ranker = FusionRanker::new(settings.fusion_method, weights).with_rrf_k(settings.rrf_k)?;
        let embedder_id = embedder.id().to_string();

        cancel.check()?;
        let mut vector = VectorIndex::new(embedder);
        vector.clear();
        vector.add(documents)?;

        cancel.check()?;
        let mut lexical = LexicalIndex::new(settings.bm25, settings.language)?;
        lexical.clear();
        lexical.add(documents)?;

        let metadata = FusionMetadata {
            vector_weight: weights.vector(),
            lexical_weight: weights.lexical(),
            fusion_method: settings.fusion_method,
            document_count: documents.len(),
            tenant_id: key.tenant_id().to_string(),
            collection_id: key.collection_id().to_string(),
            generation,
            rrf_k: settings.rrf_k,
            embedder_id,
            built_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        Ok(Self { key: key.clone(), metadata, ranker, vector, lexical })
    }

    pub fn load(key: &TenantKey, paths: &ArtifactPaths, settings: &IndexSettings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let (fusion_header, metadata): (ArtifactHeader, FusionMetadata) = storage::read_artifact(paths.get(ArtifactKind::Fusion))?;
        let mut vector = VectorIndex::new(embedder);
        let vector_header = vector.load(paths.get(ArtifactKind::Vector))?;
        let mut lexical = LexicalIndex::new(settings.bm25, settings.language)?;
        let lexical_header = lexical.load(paths.get(ArtifactKind::Lexical))?;

        let agrees = |h: &ArtifactHeader| {
            h.belongs_to(key) && h.generation == metadata.generation && h.document_count == metadata.document_count
        };
        if !(agrees(&fusion_header) && agrees(&vector_header) && agrees(&lexical_header))
            || metadata.tenant_id != key.tenant_id()
            || metadata.collection_id != key.collection_id()
        {
            return Err(Error::Serialization(format!("artifacts of {key} disagree on generation or size")));
        }

        let ranker = FusionRanker::from_metadata(&metadata)?;
        Ok(Self { key: key.clone(), metadata, ranker, vector, lexical })
    }

    /// Write all three artifacts to their staged siblings.
    pub fn stage(&self, paths: &ArtifactPaths) -> Result<()> {
        let id = self.metadata.generation;
        let count = self.metadata.document_count;
        let header = |kind| ArtifactHeader::new(kind, &self.key, count, id);

        self.vector.save(&storage::staged_path(paths.get(ArtifactKind::Vector), id), &header(ArtifactKind::Vector))?;
        self.lexical.save(&storage::staged_path(paths.get(ArtifactKind::Lexical), id), &header(ArtifactKind::Lexical))?;
        storage::write_artifact(
            &storage::staged_path(paths.get(ArtifactKind::Fusion), id),
            &header(ArtifactKind::Fusion),
            &self.metadata,
        )
    }

    pub fn search(&self, query: &str, mode: SearchMode, top_k: usize, candidates: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        match mode {
            SearchMode::Vector => self.vector.search(query, top_k),
            SearchMode::Lexical => self.lexical.search(query, top_k),
            SearchMode::Hybrid => {
                let depth = candidates.max(top_k);
                let vector = self.vector.search(query, depth)?;
                let lexical = self.lexical.search(query, depth)?;
                Ok(self.ranker.merge(&vector, &lexical, top_k))
            }
        }
    }

    pub fn key(&self) -> &TenantKey {
        &self.key
    }

    pub fn metadata(&self) -> &FusionMetadata {
        &self.metadata
    }

    pub fn generation(&self) -> u64 {
        self.metadata.generation
    }

    pub fn document_count(&self) -> usize {
        self.metadata.document_count
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            tenant_id: self.key.tenant_id().to_string(),
            collection_id: self.key.collection_id().to_string(),
            document_count: self.metadata.document_count,
            generation: self.metadata.generation,
            metadata: self.metadata.clone(),
            vector: self.vector.stats(),
            lexical: self.lexical.stats(),
        }
    }
}
