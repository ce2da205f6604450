use segdb_core::traits::TenantContext;
use segdb_core::types::{ArtifactKind, Document, SearchHit, SearchMode, TenantKey};
use segdb_core::{Error, Result};

use crate::coordinator::{IndexCoordinator, IndexListing};
use crate::generation::IndexStats;

/// Coordinator operations pinned to the tenant of a session.
pub struct TenantHandle<'a> {
    coordinator: &'a IndexCoordinator,
    tenant_id: String,
}

impl IndexCoordinator {
    /// Resolve the current tenant once; `NotAuthenticated` when the context has none.
    pub fn scoped(&self, context: &dyn TenantContext) -> Result<TenantHandle<'_>> {
        match context.current_tenant() {
            Some(tenant_id) if !tenant_id.is_empty() => Ok(TenantHandle { coordinator: self, tenant_id }),
            _ => Err(Error::NotAuthenticated),
        }
    }
}

impl TenantHandle<'_> {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Key for `collection_id` under this tenant, for stamping documents.
    pub fn key(&self, collection_id: &str) -> Result<TenantKey> {
        TenantKey::new(self.tenant_id.as_str(), collection_id)
    }

    pub fn build(&self, collection_id: &str, documents: &[Document]) -> Result<IndexStats> {
        self.coordinator.build(&self.tenant_id, collection_id, documents)
    }

    pub fn search(&self, collection_id: &str, query: &str, mode: SearchMode, top_k: usize) -> Result<Vec<SearchHit>> {
        self.coordinator.search(&self.tenant_id, collection_id, query, mode, top_k)
    }

    pub fn search_with_min_score(
        &self,
        collection_id: &str,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        self.coordinator.search_with_min_score(&self.tenant_id, collection_id, query, mode, top_k, min_score)
    }

    pub fn exists(&self, collection_id: &str) -> bool {
        self.coordinator.exists(&self.tenant_id, collection_id)
    }

    pub fn delete(&self, collection_id: &str) -> Result<Vec<ArtifactKind>> {
        self.coordinator.delete(&self.tenant_id, collection_id)
    }

    pub fn list(&self) -> Result<Vec<IndexListing>> {
        self.coordinator.list(&self.tenant_id)
    }
}
