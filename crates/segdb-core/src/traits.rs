use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::{self, ArtifactHeader};
use crate::types::{ArtifactKind, Document, SearchHit, TenantKey};

/// Maps text to a fixed-length dense vector.
///
/// Implementations must be deterministic for a given `id()` and return
/// vectors of length `dim()`.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `bge-m3:d1024`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Resolves where the artifacts of a key live.
///
/// Must be injective: two distinct keys never resolve to overlapping paths.
/// This is the isolation boundary and is trusted, not re-checked.
pub trait PathResolver: Send + Sync {
    fn resolve_path(&self, key: &TenantKey, kind: ArtifactKind) -> PathBuf;

    /// Collections that currently have any artifact for `tenant_id`.
    fn list_collections(&self, _tenant_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Tenants that currently have any artifact directory.
    fn list_tenants(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Opaque accessor for "who is the current tenant", supplied by the session layer.
pub trait TenantContext: Send + Sync {
    fn current_tenant(&self) -> Option<String>;
}

/// A fixed tenant, for CLIs and tests.
#[derive(Debug, Clone)]
pub struct StaticTenant(pub String);

impl TenantContext for StaticTenant {
    fn current_tenant(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Shared contract of the vector and lexical engines.
pub trait RetrievalEngine: Send + Sync {
    fn kind(&self) -> ArtifactKind;
    fn clear(&mut self);
    fn add(&mut self, documents: &[Document]) -> Result<()>;
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
    fn save(&self, path: &Path, header: &ArtifactHeader) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<ArtifactHeader>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn delete(&self, path: &Path) -> Result<bool> {
        storage::remove_artifact(path)
    }
}
