use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use segdb_core::config::IndexSettings;
use segdb_core::paths::DirPathResolver;
use segdb_core::storage;
use segdb_core::traits::{Embedder, PathResolver};
use segdb_core::types::{ArtifactKind, Document, SearchHit, SearchMode, TenantKey};
use segdb_core::{Error, Result};

use crate::generation::{inspect, ArtifactPaths, CancelToken, DiskState, Generation, IndexStats};

/// Lifecycle state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Absent,
    Building,
    Ready,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexListing {
    pub collection_id: String,
    pub state: IndexState,
    pub document_count: Option<usize>,
    pub generation: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub ready: usize,
    /// Sets brought back from the retired files of an interrupted swap; also counted in `ready`.
    pub restored: usize,
    pub stale_removed: usize,
    pub leftovers_removed: usize,
    pub skipped_busy: usize,
}

impl RecoveryOutcome {
    fn absorb(&mut self, other: RecoveryOutcome) {
        self.ready += other.ready;
        self.restored += other.restored;
        self.stale_removed += other.stale_removed;
        self.leftovers_removed += other.leftovers_removed;
        self.skipped_busy += other.skipped_busy;
    }
}

#[derive(Default)]
struct KeySlot {
    /// Held by build and delete.
    writer: Mutex<()>,
    building: AtomicBool,
    /// Also serialises on-disk commits with lazy loads.
    current: RwLock<Option<Arc<Generation>>>,
}

struct BuildingFlag<'a>(&'a AtomicBool);

impl<'a> BuildingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the per-key state machine and the resident generations.
///
/// Readers clone the resident `Arc<Generation>` and search without holding a
/// lock, so a rebuild never blocks searches against the previous generation.
pub struct IndexCoordinator {
    settings: IndexSettings,
    embedder: Arc<dyn Embedder>,
    resolver: Arc<dyn PathResolver>,
    slots: DashMap<TenantKey, Arc<KeySlot>>,
}

impl IndexCoordinator {
    pub fn new(settings: IndexSettings, embedder: Arc<dyn Embedder>, resolver: Arc<dyn PathResolver>) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, embedder, resolver, slots: DashMap::new() })
    }

    /// Configured embedder and a [`DirPathResolver`] rooted at `settings.root_dir` (relative to `base`).
    pub fn from_settings(settings: IndexSettings, base: &Path) -> Result<Self> {
        let embedder = segdb_embed::get_default_embedder(&settings.embedding)?;
        let resolver = Arc::new(DirPathResolver::new(settings.root_path(base)));
        Self::new(settings, embedder, resolver)
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    fn slot(&self, key: &TenantKey) -> Arc<KeySlot> {
        let slot = self.slots.entry(key.clone()).or_insert_with(|| Arc::new(KeySlot::default()));
        Arc::clone(slot.value())
    }

    fn tracked(&self, key: &TenantKey) -> Option<Arc<KeySlot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Slot for a key with in-memory state or files on disk; `None` for a plainly absent key,
    /// so lookups of unknown keys leave nothing behind.
    fn slot_if_present(&self, key: &TenantKey) -> Option<Arc<KeySlot>> {
        if let Some(slot) = self.tracked(key) {
            return Some(slot);
        }
        let paths = self.paths(key);
        if inspect(&paths, key) != DiskState::Absent || has_retired(&paths) {
            return Some(self.slot(key));
        }
        // a build registered after the first lookup may have been mid-commit while we looked
        self.tracked(key)
    }

    /// Forget the slot once no one else holds it and it has no resident generation.
    fn release(&self, key: &TenantKey, slot: Arc<KeySlot>) {
        drop(slot);
        self.slots.remove_if(key, |_, s| Arc::strong_count(s) == 1 && s.current.read().is_none());
    }

    /// Keys currently holding in-memory state.
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    fn paths(&self, key: &TenantKey) -> ArtifactPaths {
        ArtifactPaths::resolve(self.resolver.as_ref(), key)
    }

    pub fn build(&self, tenant_id: &str, collection_id: &str, documents: &[Document]) -> Result<IndexStats> {
        self.build_with_cancel(tenant_id, collection_id, documents, &CancelToken::new())
    }

    pub fn build_with_cancel(
        &self,
        tenant_id: &str,
        collection_id: &str,
        documents: &[Document],
        cancel: &CancelToken,
    ) -> Result<IndexStats> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        if documents.is_empty() {
            return Err(Error::InvalidDocument(format!("no documents to index for {key}")));
        }
        if let Some(i) = documents.iter().position(|d| !key.owns(d)) {
            let doc = &documents[i];
            return Err(Error::InvalidDocument(format!(
                "document {i} belongs to {}/{}, not {key}",
                doc.tenant_id, doc.collection_id
            )));
        }

        let slot = self.slot(&key);
        let result = self.build_locked(&key, &slot, documents, cancel);
        match result {
            Ok(generation) => {
                info!(tenant = key.tenant_id(), collection = key.collection_id(), generation = generation.generation(), "index ready");
                Ok(generation.stats())
            }
            Err(e) => {
                self.release(&key, slot);
                if !matches!(e, Error::BuildInProgress { .. }) {
                    error!(tenant = key.tenant_id(), collection = key.collection_id(), error = %e, "build failed");
                }
                Err(e)
            }
        }
    }

    fn build_locked(&self, key: &TenantKey, slot: &KeySlot, documents: &[Document], cancel: &CancelToken) -> Result<Arc<Generation>> {
        let Some(_writer) = slot.writer.try_lock() else {
            return Err(key.build_in_progress());
        };
        let _building = BuildingFlag::raise(&slot.building);
        let paths = self.paths(key);
        let generation_id = self.next_generation_id(slot, &paths);
        info!(tenant = key.tenant_id(), collection = key.collection_id(), documents = documents.len(), generation = generation_id, "building index");

        let generation = Generation::build(key, documents, &self.settings, Arc::clone(&self.embedder), generation_id, cancel)?;
        let staged = generation.stage(&paths).and_then(|()| cancel.check());
        if let Err(e) = staged {
            discard_staged(&paths, generation_id);
            return Err(e);
        }
        let mut current = slot.current.write();
        commit(&paths, generation_id)?;
        let generation = Arc::new(generation);
        *current = Some(Arc::clone(&generation));
        Ok(generation)
    }

    fn next_generation_id(&self, slot: &KeySlot, paths: &ArtifactPaths) -> u64 {
        let resident = slot.current.read().as_ref().map(|g| g.generation());
        let on_disk = storage::read_header(paths.get(ArtifactKind::Fusion)).ok().map(|h| h.generation);
        let previous = resident.into_iter().chain(on_disk).max().unwrap_or(0);
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        now.max(previous.saturating_add(1))
    }

    /// Search with the configured `min_score`.
    pub fn search(
        &self,
        tenant_id: &str,
        collection_id: &str,
        query: &str,
        mode: SearchMode,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        self.search_with_min_score(tenant_id, collection_id, query, mode, top_k, self.settings.min_score)
    }

    /// Search, dropping hits that score below `min_score`. Hybrid searches apply it to fused scores.
    pub fn search_with_min_score(
        &self,
        tenant_id: &str,
        collection_id: &str,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        let generation = self.resident_or_load(&key)?;
        let candidates = top_k.saturating_mul(self.settings.candidate_multiplier).max(self.settings.min_candidates);
        let mut hits = generation.search(query, mode, top_k, candidates)?;
        if let Some(floor) = min_score {
            hits.retain(|h| h.score >= floor);
        }
        debug!(tenant = tenant_id, collection = collection_id, ?mode, top_k, hits = hits.len(), "search");
        Ok(hits)
    }

    /// Resident generation, loading it from disk when necessary.
    fn resident_or_load(&self, key: &TenantKey) -> Result<Arc<Generation>> {
        let Some(slot) = self.slot_if_present(key) else {
            return Err(key.not_ready());
        };
        let loaded = self.load_into(key, &slot);
        if loaded.is_err() {
            self.release(key, slot);
        }
        loaded
    }

    fn load_into(&self, key: &TenantKey, slot: &KeySlot) -> Result<Arc<Generation>> {
        if let Some(generation) = slot.current.read().clone() {
            return Ok(generation);
        }
        let mut current = slot.current.write();
        if let Some(generation) = current.clone() {
            return Ok(generation);
        }
        let paths = self.paths(key);
        match self.observe(key, &paths) {
            DiskState::Complete { generation, .. } => {
                let loaded = Generation::load(key, &paths, &self.settings, Arc::clone(&self.embedder)).map_err(|e| {
                    error!(tenant = key.tenant_id(), collection = key.collection_id(), error = %e, "loading index failed");
                    e
                })?;
                info!(tenant = key.tenant_id(), collection = key.collection_id(), generation, "index loaded");
                let loaded = Arc::new(loaded);
                *current = Some(Arc::clone(&loaded));
                Ok(loaded)
            }
            DiskState::Absent | DiskState::Partial => Err(key.not_ready()),
        }
    }

    /// Inspect the canonical files, bring back a set orphaned by an interrupted swap and
    /// delete a partial one. Caller holds the slot's generation write lock.
    fn observe(&self, key: &TenantKey, paths: &ArtifactPaths) -> DiskState {
        let mut state = inspect(paths, key);
        if !matches!(state, DiskState::Complete { .. }) {
            match restore_retired(paths) {
                Ok(true) => {
                    state = inspect(paths, key);
                    warn!(tenant = key.tenant_id(), collection = key.collection_id(), ?state, "restored artifacts of an interrupted swap");
                }
                Ok(false) => {}
                Err(e) => error!(tenant = key.tenant_id(), collection = key.collection_id(), error = %e, "restoring retired artifacts failed"),
            }
        }
        if state == DiskState::Partial {
            warn!(tenant = key.tenant_id(), collection = key.collection_id(), "removing incomplete artifact set");
            if let Err(e) = remove_canonical(paths) {
                error!(tenant = key.tenant_id(), collection = key.collection_id(), error = %e, "cleanup failed");
            }
        }
        state
    }

    pub fn exists(&self, tenant_id: &str, collection_id: &str) -> bool {
        let Ok(key) = TenantKey::new(tenant_id, collection_id) else { return false };
        let Some(slot) = self.slot_if_present(&key) else { return false };
        let ready = self.ready_locked(&key, &slot);
        if !ready {
            self.release(&key, slot);
        }
        ready
    }

    fn ready_locked(&self, key: &TenantKey, slot: &KeySlot) -> bool {
        if slot.current.read().is_some() {
            return true;
        }
        let _current = slot.current.write();
        matches!(self.observe(key, &self.paths(key)), DiskState::Complete { .. })
    }

    /// Remove every artifact of the key. Returns the kinds that existed; waits for a running build.
    pub fn delete(&self, tenant_id: &str, collection_id: &str) -> Result<Vec<ArtifactKind>> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        let slot = self.slot(&key);
        let deleted = self.delete_locked(&key, &slot);
        self.release(&key, slot);
        let deleted = deleted?;
        info!(tenant = tenant_id, collection = collection_id, deleted = deleted.len(), "index deleted");
        Ok(deleted)
    }

    fn delete_locked(&self, key: &TenantKey, slot: &KeySlot) -> Result<Vec<ArtifactKind>> {
        let _writer = slot.writer.lock();
        let mut current = slot.current.write();
        *current = None;

        let paths = self.paths(key);
        let mut deleted = Vec::new();
        // fusion first: an interrupted delete leaves a partial set, never a ready one
        for kind in [ArtifactKind::Fusion, ArtifactKind::Lexical, ArtifactKind::Vector] {
            let path = paths.get(kind);
            if storage::remove_artifact(path)? {
                deleted.push(kind);
            }
            storage::sweep_siblings(path)?;
        }
        if let Some(dir) = paths.get(ArtifactKind::Fusion).parent() {
            // only succeeds when nothing else lives there
            if std::fs::remove_dir(dir).is_ok() {
                debug!(dir = %dir.display(), "removed empty index directory");
            }
        }
        Ok(deleted)
    }

    pub fn stats(&self, tenant_id: &str, collection_id: &str) -> Result<IndexStats> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        Ok(self.resident_or_load(&key)?.stats())
    }

    /// Reports without cleaning up, so a partial set shows as `Stale`.
    pub fn state(&self, tenant_id: &str, collection_id: &str) -> Result<IndexState> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        let Some(slot) = self.slot_if_present(&key) else {
            return Ok(IndexState::Absent);
        };
        let state = self.state_locked(&key, &slot);
        self.release(&key, slot);
        Ok(state)
    }

    fn state_locked(&self, key: &TenantKey, slot: &KeySlot) -> IndexState {
        if slot.building.load(Ordering::SeqCst) {
            return IndexState::Building;
        }
        if slot.current.read().is_some() {
            return IndexState::Ready;
        }
        let _current = slot.current.write();
        match inspect(&self.paths(key), key) {
            DiskState::Absent => IndexState::Absent,
            DiskState::Complete { .. } => IndexState::Ready,
            DiskState::Partial => IndexState::Stale,
        }
    }

    pub fn list(&self, tenant_id: &str) -> Result<Vec<IndexListing>> {
        let mut listings = Vec::new();
        for collection_id in self.resolver.list_collections(tenant_id)? {
            let key = TenantKey::new(tenant_id, collection_id.as_str())?;
            let state = self.state(tenant_id, &collection_id)?;
            let resident = self.tracked(&key).and_then(|slot| slot.current.read().clone());
            let (document_count, generation) = match resident {
                Some(g) => (Some(g.document_count()), Some(g.generation())),
                None => match storage::read_header(self.paths(&key).get(ArtifactKind::Fusion)) {
                    Ok(h) if state == IndexState::Ready => (Some(h.document_count), Some(h.generation)),
                    _ => (None, None),
                },
            };
            listings.push(IndexListing { collection_id, state, document_count, generation });
        }
        Ok(listings)
    }

    /// Sweep every tenant the resolver knows about.
    pub fn recover(&self) -> Result<RecoveryOutcome> {
        let mut outcome = RecoveryOutcome::default();
        for tenant_id in self.resolver.list_tenants()? {
            outcome.absorb(self.recover_tenant(&tenant_id)?);
        }
        info!(?outcome, "recovery finished");
        Ok(outcome)
    }

    /// Restore sets orphaned by interrupted swaps, then remove swap leftovers and incomplete sets
    /// for one tenant. Keys with a running build are skipped.
    pub fn recover_tenant(&self, tenant_id: &str) -> Result<RecoveryOutcome> {
        let mut outcome = RecoveryOutcome::default();
        for collection_id in self.resolver.list_collections(tenant_id)? {
            let key = TenantKey::new(tenant_id, collection_id.as_str())?;
            let slot = self.slot(&key);
            let recovered = self.recover_key(&key, &slot, &mut outcome);
            self.release(&key, slot);
            recovered?;
        }
        debug!(tenant = tenant_id, ?outcome, "tenant recovered");
        Ok(outcome)
    }

    fn recover_key(&self, key: &TenantKey, slot: &KeySlot, outcome: &mut RecoveryOutcome) -> Result<()> {
        let Some(_writer) = slot.writer.try_lock() else {
            outcome.skipped_busy += 1;
            return Ok(());
        };
        let mut current = slot.current.write();
        let paths = self.paths(key);
        let mut state = inspect(&paths, key);
        if !matches!(state, DiskState::Complete { .. }) && restore_retired(&paths)? {
            state = inspect(&paths, key);
            if matches!(state, DiskState::Complete { .. }) {
                info!(tenant = key.tenant_id(), collection = key.collection_id(), "restored previous generation");
                outcome.restored += 1;
            }
        }
        for kind in ArtifactKind::ALL {
            outcome.leftovers_removed += storage::sweep_siblings(paths.get(kind))?;
        }
        match state {
            DiskState::Complete { .. } => outcome.ready += 1,
            DiskState::Partial => {
                remove_canonical(&paths)?;
                *current = None;
                outcome.stale_removed += 1;
            }
            DiskState::Absent => *current = None,
        }
        Ok(())
    }

    /// Drop the resident generation; the next search reloads it from disk.
    pub fn evict(&self, tenant_id: &str, collection_id: &str) -> Result<bool> {
        let key = TenantKey::new(tenant_id, collection_id)?;
        let Some(slot) = self.tracked(&key) else { return Ok(false) };
        let evicted = slot.current.write().take().is_some();
        self.release(&key, slot);
        Ok(evicted)
    }
}

/// Retire the current set (fusion first), promote the staged one (fusion last), then drop the retired files.
/// On failure the retired set is restored.
fn commit(paths: &ArtifactPaths, generation: u64) -> Result<()> {
    let mut retired: Vec<(ArtifactKind, std::path::PathBuf)> = Vec::new();
    for kind in [ArtifactKind::Fusion, ArtifactKind::Lexical, ArtifactKind::Vector] {
        let canonical = paths.get(kind);
        if !canonical.exists() {
            continue;
        }
        let target = storage::retired_path(canonical, generation);
        if let Err(e) = storage::promote(canonical, &target) {
            rollback(paths, generation, &[], &retired);
            return Err(e);
        }
        retired.push((kind, target));
    }

    let mut promoted = Vec::new();
    for kind in [ArtifactKind::Vector, ArtifactKind::Lexical, ArtifactKind::Fusion] {
        let canonical = paths.get(kind);
        if let Err(e) = storage::promote(&storage::staged_path(canonical, generation), canonical) {
            rollback(paths, generation, &promoted, &retired);
            return Err(e);
        }
        promoted.push(kind);
    }

    for (_, path) in retired {
        if let Err(e) = storage::remove_artifact(&path) {
            warn!(path = %path.display(), error = %e, "could not remove retired artifact");
        }
    }
    Ok(())
}

fn rollback(paths: &ArtifactPaths, generation: u64, promoted: &[ArtifactKind], retired: &[(ArtifactKind, std::path::PathBuf)]) {
    for kind in promoted {
        if let Err(e) = storage::remove_artifact(paths.get(*kind)) {
            error!(kind = %kind, error = %e, "rollback could not remove promoted artifact");
        }
    }
    for (kind, path) in retired {
        if let Err(e) = storage::promote(path, paths.get(*kind)) {
            error!(kind = %kind, error = %e, "rollback could not restore retired artifact");
        }
    }
    discard_staged(paths, generation);
}

fn discard_staged(paths: &ArtifactPaths, generation: u64) {
    for kind in ArtifactKind::ALL {
        let staged = storage::staged_path(paths.get(kind), generation);
        if let Err(e) = storage::remove_artifact(&staged) {
            warn!(path = %staged.display(), error = %e, "could not remove staged artifact");
        }
    }
}

fn remove_canonical(paths: &ArtifactPaths) -> Result<()> {
    for kind in [ArtifactKind::Fusion, ArtifactKind::Lexical, ArtifactKind::Vector] {
        storage::remove_artifact(paths.get(kind))?;
    }
    Ok(())
}

fn has_retired(paths: &ArtifactPaths) -> bool {
    ArtifactKind::ALL.iter().any(|&kind| match storage::retired_generations(paths.get(kind)) {
        Ok(generations) => !generations.is_empty(),
        Err(_) => true,
    })
}

/// Move the newest retired set back over the canonical paths (fusion last).
/// A crash between retiring the old set and promoting the new one leaves the old set only
/// under retired names. Returns whether anything was moved.
fn restore_retired(paths: &ArtifactPaths) -> Result<bool> {
    let mut generations = Vec::new();
    for kind in ArtifactKind::ALL {
        generations.extend(storage::retired_generations(paths.get(kind))?);
    }
    let Some(generation) = generations.into_iter().max() else { return Ok(false) };
    let mut moved = false;
    for kind in [ArtifactKind::Vector, ArtifactKind::Lexical, ArtifactKind::Fusion] {
        let canonical = paths.get(kind);
        let retired = storage::retired_path(canonical, generation);
        if retired.exists() {
            storage::promote(&retired, canonical)?;
            moved = true;
        }
    }
    Ok(moved)
}
