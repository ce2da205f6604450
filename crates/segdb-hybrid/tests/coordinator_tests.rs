use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use segdb_core::config::{EmbeddingProvider, EmbeddingSettings, IndexSettings};
use segdb_core::paths::DirPathResolver;
use segdb_core::storage;
use segdb_core::traits::{Embedder, StaticTenant, TenantContext};
use segdb_core::types::{ArtifactKind, Document, SearchMode};
use segdb_core::{Error, Result, TenantKey};
use segdb_embed::HashEmbedder;
use segdb_hybrid::{CancelToken, IndexCoordinator, IndexState};
use tempfile::TempDir;

const DIM: usize = 64;

fn settings() -> IndexSettings {
    IndexSettings {
        embedding: EmbeddingSettings { provider: EmbeddingProvider::Hash, dim: DIM, ..Default::default() },
        ..Default::default()
    }
}

fn coordinator_with(root: &Path, embedder: Arc<dyn Embedder>) -> IndexCoordinator {
    IndexCoordinator::new(settings(), embedder, Arc::new(DirPathResolver::new(root))).expect("coordinator")
}

fn coordinator(root: &Path) -> IndexCoordinator {
    coordinator_with(root, Arc::new(HashEmbedder::new(DIM, 256)))
}

fn docs(tenant: &str, collection: &str, texts: &[&str]) -> Vec<Document> {
    let key = TenantKey::new(tenant, collection).unwrap();
    texts.iter().enumerate().map(|(i, t)| Document::new(&key, *t, i as f64 * 2.0, i as f64 * 2.0 + 2.0)).collect()
}

fn key_dir(root: &Path, tenant: &str, collection: &str) -> std::path::PathBuf {
    DirPathResolver::new(root).key_dir(&TenantKey::new(tenant, collection).unwrap())
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

const SCENARIO: [&str; 3] = ["cats are mammals", "dogs bark", "fusion reactors"];

#[test]
fn three_document_scenario() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    let stats = coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).expect("build");
    assert_eq!(stats.document_count, 3);
    assert!((stats.metadata.vector_weight - 0.6).abs() < 1e-6);

    let hits = coord.search("alice", "talk", "cats", SearchMode::Hybrid, 1).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].position, 0);
    assert_eq!(hits[0].document.text, "cats are mammals");

    assert!(coord.search("alice", "talk", "cats", SearchMode::Hybrid, 0).unwrap().is_empty());

    let lexical = coord.search("alice", "talk", "reactors", SearchMode::Lexical, 5).unwrap();
    assert_eq!(lexical.len(), 1);
    assert_eq!(lexical[0].position, 2);

    let vector = coord.search("alice", "talk", "dogs", SearchMode::Vector, 3).unwrap();
    assert_eq!(vector.len(), 3);
    assert_eq!(vector[0].position, 1);
}

#[test]
fn huge_top_k_is_clamped_not_overflowed() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();

    assert_eq!(coord.search("alice", "talk", "cats", SearchMode::Vector, usize::MAX).unwrap().len(), 3);
    assert_eq!(coord.search("alice", "talk", "cats", SearchMode::Lexical, usize::MAX).unwrap().len(), 1);
    assert_eq!(coord.search("alice", "talk", "cats", SearchMode::Hybrid, usize::MAX).unwrap().len(), 3);
}

#[test]
fn min_score_drops_weak_hits() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();

    let all = coord.search("alice", "talk", "dogs", SearchMode::Vector, 3).unwrap();
    let floor = all[1].score;
    let kept = coord.search_with_min_score("alice", "talk", "dogs", SearchMode::Vector, 3, Some(floor)).unwrap();
    assert!(kept.len() >= 2);
    assert!(kept.iter().all(|h| h.score >= floor));
    assert_eq!(kept[0].position, 1);

    let hybrid = coord.search_with_min_score("alice", "talk", "reactors", SearchMode::Hybrid, 3, Some(1.0)).unwrap();
    assert!(hybrid.is_empty(), "rrf scores stay far below 1");
    assert_eq!(coord.search_with_min_score("alice", "talk", "reactors", SearchMode::Lexical, 3, None).unwrap().len(), 1);

    let strict = IndexCoordinator::new(
        IndexSettings { min_score: Some(f32::MAX), ..settings() },
        Arc::new(HashEmbedder::new(DIM, 256)),
        Arc::new(DirPathResolver::new(tmp.path())),
    )
    .unwrap();
    assert!(strict.search("alice", "talk", "reactors", SearchMode::Lexical, 3).unwrap().is_empty());
}

#[test]
fn tenants_never_see_each_other() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "notes", &docs("alice", "notes", &["alpha secret plans"])).unwrap();
    coord.build("bob", "notes", &docs("bob", "notes", &["beta public notes"])).unwrap();
    coord.build("a/b", "c", &docs("a/b", "c", &["slash tenant"])).unwrap();
    coord.build("a", "b/c", &docs("a", "b/c", &["slash collection"])).unwrap();

    assert!(coord.search("bob", "notes", "secret", SearchMode::Lexical, 5).unwrap().is_empty());
    let hybrid = coord.search("bob", "notes", "alpha secret plans", SearchMode::Hybrid, 10).unwrap();
    assert!(!hybrid.is_empty());
    assert!(hybrid.iter().all(|h| h.document.tenant_id == "bob"));

    let slash = coord.search("a", "b/c", "slash", SearchMode::Lexical, 5).unwrap();
    assert_eq!(slash.len(), 1);
    assert_eq!(slash[0].document.text, "slash collection");

    coord.delete("alice", "notes").unwrap();
    assert!(coord.exists("bob", "notes"));
    assert!(matches!(coord.search("bob", "carol", "x", SearchMode::Hybrid, 3), Err(Error::NotReady { .. })));
}

#[test]
fn build_rejects_foreign_or_missing_documents() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    let foreign = docs("bob", "notes", &["hello"]);
    assert!(matches!(coord.build("alice", "notes", &foreign), Err(Error::InvalidDocument(_))));
    assert!(matches!(coord.build("alice", "notes", &[]), Err(Error::InvalidDocument(_))));
    assert!(matches!(coord.build("", "notes", &foreign), Err(Error::InvalidKey(_))));
    assert!(!coord.exists("", "notes"));
    assert_eq!(coord.state("alice", "notes").unwrap(), IndexState::Absent);
}

#[test]
fn artifacts_round_trip_through_a_restart() {
    let tmp = TempDir::new().unwrap();
    let before = {
        let coord = coordinator(tmp.path());
        coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
        coord.search("alice", "talk", "fusion cats", SearchMode::Hybrid, 3).unwrap()
    };

    let coord = coordinator(tmp.path());
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Ready);
    assert!(coord.exists("alice", "talk"));
    let after = coord.search("alice", "talk", "fusion cats", SearchMode::Hybrid, 3).unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.position, b.position);
        assert_eq!(a.document, b.document);
        assert!((a.score - b.score).abs() < 1e-6);
    }
    assert_eq!(coord.stats("alice", "talk").unwrap().lexical.document_count, 3);
}

#[test]
fn delete_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();

    let mut deleted = coord.delete("alice", "talk").unwrap();
    deleted.sort_by_key(|k| k.as_str());
    let mut all = ArtifactKind::ALL.to_vec();
    all.sort_by_key(|k| k.as_str());
    assert_eq!(deleted, all);

    assert!(coord.delete("alice", "talk").unwrap().is_empty());
    assert!(!coord.exists("alice", "talk"));
    assert!(matches!(coord.search("alice", "talk", "cats", SearchMode::Hybrid, 1), Err(Error::NotReady { .. })));
    assert!(!key_dir(tmp.path(), "alice", "talk").exists());
}

/// Fails whenever a batch mentions "boom".
struct FailingEmbedder(HashEmbedder);

impl Embedder for FailingEmbedder {
    fn id(&self) -> &str {
        self.0.id()
    }
    fn dim(&self) -> usize {
        self.0.dim()
    }
    fn max_len(&self) -> usize {
        self.0.max_len()
    }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("boom")) {
            return Err(Error::Embedding("provider unavailable".into()));
        }
        self.0.embed_batch(texts)
    }
}

#[test]
fn failed_build_leaves_absent_key_absent() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator_with(tmp.path(), Arc::new(FailingEmbedder(HashEmbedder::new(DIM, 256))));
    let err = coord.build("alice", "talk", &docs("alice", "talk", &["fine", "boom"])).unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
    assert!(err.is_retryable());
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Absent);
    assert!(files_in(&key_dir(tmp.path(), "alice", "talk")).is_empty());
}

#[test]
fn failed_rebuild_keeps_previous_generation() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator_with(tmp.path(), Arc::new(FailingEmbedder(HashEmbedder::new(DIM, 256))));
    let first = coord.build("alice", "talk", &docs("alice", "talk", &["fine day"])).unwrap();
    assert!(coord.build("alice", "talk", &docs("alice", "talk", &["boom goes the dynamite"])).is_err());

    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Ready);
    assert_eq!(coord.stats("alice", "talk").unwrap().generation, first.generation);
    let hits = coord.search("alice", "talk", "fine", SearchMode::Lexical, 3).unwrap();
    assert_eq!(hits[0].document.text, "fine day");
    assert_eq!(
        files_in(&key_dir(tmp.path(), "alice", "talk")),
        vec!["fusion_meta.json", "lexical_index.json", "vector_index.json"]
    );

    let restarted = coordinator(tmp.path());
    assert_eq!(restarted.stats("alice", "talk").unwrap().generation, first.generation);
}

#[test]
fn partial_set_is_stale_and_cleaned_on_search() {
    let tmp = TempDir::new().unwrap();
    coordinator(tmp.path()).build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    let dir = key_dir(tmp.path(), "alice", "talk");
    fs::remove_file(dir.join("vector_index.json")).unwrap();

    let coord = coordinator(tmp.path());
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Stale);
    assert!(matches!(coord.search("alice", "talk", "cats", SearchMode::Hybrid, 1), Err(Error::NotReady { .. })));
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Absent);
    assert!(files_in(&dir).is_empty());
}

#[test]
fn mismatched_generations_are_stale() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    let dir = key_dir(tmp.path(), "alice", "talk");
    let old_vector = fs::read(dir.join("vector_index.json")).unwrap();
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    fs::write(dir.join("vector_index.json"), old_vector).unwrap();

    let restarted = coordinator(tmp.path());
    assert_eq!(restarted.state("alice", "talk").unwrap(), IndexState::Stale);
    assert!(!restarted.exists("alice", "talk"));
}

#[test]
fn recover_sweeps_swap_leftovers() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    coord.build("bob", "half", &docs("bob", "half", &["only half"])).unwrap();

    let dir = key_dir(tmp.path(), "alice", "talk");
    fs::write(dir.join("fusion_meta.json.staged-1"), "x").unwrap();
    fs::write(dir.join(".vector_index.json.tmp-abc"), "x").unwrap();
    fs::remove_file(key_dir(tmp.path(), "bob", "half").join("lexical_index.json")).unwrap();

    let restarted = coordinator(tmp.path());
    let outcome = restarted.recover().unwrap();
    assert_eq!(outcome.ready, 1);
    assert_eq!(outcome.leftovers_removed, 2);
    assert_eq!(outcome.stale_removed, 1);
    assert_eq!(outcome.skipped_busy, 0);
    assert_eq!(restarted.state("alice", "talk").unwrap(), IndexState::Ready);
    assert_eq!(restarted.state("bob", "half").unwrap(), IndexState::Absent);
    assert_eq!(files_in(&dir).len(), 3);
}

fn retire_canonical_set(dir: &Path, swap_generation: u64) {
    for name in ["vector_index.json", "lexical_index.json", "fusion_meta.json"] {
        let canonical = dir.join(name);
        fs::rename(&canonical, storage::retired_path(&canonical, swap_generation)).unwrap();
    }
}

#[test]
fn recover_restores_set_orphaned_mid_swap() {
    let tmp = TempDir::new().unwrap();
    let built = coordinator(tmp.path()).build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    let dir = key_dir(tmp.path(), "alice", "talk");
    // old set retired, replacement never promoted
    retire_canonical_set(&dir, built.generation + 1);

    let coord = coordinator(tmp.path());
    let outcome = coord.recover().unwrap();
    assert_eq!(outcome.ready, 1);
    assert_eq!(outcome.restored, 1);
    assert_eq!(outcome.leftovers_removed, 0);
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Ready);
    assert_eq!(coord.stats("alice", "talk").unwrap().generation, built.generation);
    assert_eq!(files_in(&dir), vec!["fusion_meta.json", "lexical_index.json", "vector_index.json"]);
}

#[test]
fn search_restores_set_orphaned_mid_promotion() {
    let tmp = TempDir::new().unwrap();
    let built = coordinator(tmp.path()).build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    let dir = key_dir(tmp.path(), "alice", "talk");
    retire_canonical_set(&dir, built.generation + 1);
    // the new vector artifact made it in before the crash, the rest did not
    fs::write(dir.join("vector_index.json"), "half written").unwrap();

    let coord = coordinator(tmp.path());
    let hits = coord.search("alice", "talk", "reactors", SearchMode::Lexical, 1).unwrap();
    assert_eq!(hits[0].position, 2);
    assert_eq!(coord.stats("alice", "talk").unwrap().generation, built.generation);
}

#[test]
fn lookups_of_unknown_keys_keep_no_state() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    for i in 0..500 {
        let collection = format!("c{i}");
        assert!(!coord.exists("mallory", &collection));
        assert!(matches!(coord.search("mallory", &collection, "x", SearchMode::Hybrid, 3), Err(Error::NotReady { .. })));
        assert_eq!(coord.state("mallory", &collection).unwrap(), IndexState::Absent);
        assert!(coord.delete("mallory", &collection).unwrap().is_empty());
        assert!(!coord.evict("mallory", &collection).unwrap());
    }
    assert_eq!(coord.tracked_keys(), 0);

    coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    assert_eq!(coord.tracked_keys(), 1);
    coord.delete("alice", "talk").unwrap();
    assert_eq!(coord.tracked_keys(), 0);

    assert!(coord.build("alice", "talk", &[]).is_err());
    assert_eq!(coord.tracked_keys(), 0);
}

/// Cancels its token the first time it is asked to embed.
struct CancellingEmbedder {
    inner: HashEmbedder,
    token: CancelToken,
}

impl Embedder for CancellingEmbedder {
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
        self.token.cancel();
        self.inner.embed_batch(texts)
    }
}

#[test]
fn cancelled_build_leaves_no_trace() {
    let tmp = TempDir::new().unwrap();
    let token = CancelToken::new();
    let embedder = Arc::new(CancellingEmbedder { inner: HashEmbedder::new(DIM, 256), token: token.clone() });
    let coord = coordinator_with(tmp.path(), embedder);

    let err = coord.build_with_cancel("alice", "talk", &docs("alice", "talk", &SCENARIO), &token).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Absent);
    assert!(files_in(&key_dir(tmp.path(), "alice", "talk")).is_empty());

    let plain = coordinator(tmp.path());
    let cancelled = CancelToken::new();
    cancelled.cancel();
    assert!(matches!(
        plain.build_with_cancel("alice", "talk", &docs("alice", "talk", &SCENARIO), &cancelled),
        Err(Error::Cancelled)
    ));
}

/// Blocks any batch mentioning "gate" until released.
struct GatedEmbedder {
    inner: HashEmbedder,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Embedder for GatedEmbedder {
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
        if texts.iter().any(|t| t.contains("gate")) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.embed_batch(texts)
    }
}

#[test]
fn rebuild_serves_old_generation_until_swap() {
    let tmp = TempDir::new().unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let embedder = Arc::new(GatedEmbedder {
        inner: HashEmbedder::new(DIM, 256),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let coord = Arc::new(coordinator_with(tmp.path(), embedder));
    let first = coord.build("alice", "talk", &docs("alice", "talk", &["cats are mammals"])).unwrap();

    let builder = {
        let coord = Arc::clone(&coord);
        thread::spawn(move || coord.build("alice", "talk", &docs("alice", "talk", &["the gate keeps dogs"])))
    };
    entered_rx.recv().unwrap();

    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Building);
    let old = coord.search("alice", "talk", "cats", SearchMode::Lexical, 5).unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].document.text, "cats are mammals");
    let hybrid = coord.search("alice", "talk", "dogs", SearchMode::Hybrid, 5).unwrap();
    assert!(hybrid.iter().all(|h| h.document.text == "cats are mammals"));
    assert!(matches!(
        coord.build("alice", "talk", &docs("alice", "talk", &["other"])),
        Err(Error::BuildInProgress { .. })
    ));

    release_tx.send(()).unwrap();
    let second = builder.join().unwrap().expect("rebuild");
    assert!(second.generation > first.generation);

    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Ready);
    assert!(coord.search("alice", "talk", "cats", SearchMode::Lexical, 5).unwrap().is_empty());
    let new = coord.search("alice", "talk", "dogs", SearchMode::Lexical, 5).unwrap();
    assert_eq!(new[0].document.text, "the gate keeps dogs");
}

fn gated_coordinator(root: &Path) -> (Arc<IndexCoordinator>, mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let embedder = Arc::new(GatedEmbedder {
        inner: HashEmbedder::new(DIM, 256),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    (Arc::new(coordinator_with(root, embedder)), entered_rx, release_tx)
}

#[test]
fn delete_waits_for_running_build() {
    let tmp = TempDir::new().unwrap();
    let (coord, entered, release) = gated_coordinator(tmp.path());

    let builder = {
        let coord = Arc::clone(&coord);
        thread::spawn(move || coord.build("alice", "talk", &docs("alice", "talk", &["the gate opens"])))
    };
    entered.recv().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let deleter = {
        let coord = Arc::clone(&coord);
        thread::spawn(move || {
            let deleted = coord.delete("alice", "talk");
            done_tx.send(()).unwrap();
            deleted
        })
    };
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err(), "delete finished during the build");

    release.send(()).unwrap();
    builder.join().unwrap().expect("build");
    let deleted = deleter.join().unwrap().expect("delete");
    assert_eq!(deleted.len(), 3, "delete ran after the build committed");
    assert!(!coord.exists("alice", "talk"));
    assert_eq!(coord.state("alice", "talk").unwrap(), IndexState::Absent);
}

#[test]
fn concurrent_searches_see_exactly_one_generation() {
    const OLD: [&str; 2] = ["cats are mammals", "cats purr"];
    const NEW: [&str; 3] = ["the gate keeps cats", "cats nap", "cats hide"];
    let old: BTreeSet<String> = OLD.iter().map(|t| t.to_string()).collect();
    let new: BTreeSet<String> = NEW.iter().map(|t| t.to_string()).collect();

    let tmp = TempDir::new().unwrap();
    let (coord, entered, release) = gated_coordinator(tmp.path());
    coord.build("alice", "talk", &docs("alice", "talk", &OLD)).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..6)
        .map(|i| {
            let coord = Arc::clone(&coord);
            let stop = Arc::clone(&stop);
            let mode = if i % 2 == 0 { SearchMode::Lexical } else { SearchMode::Hybrid };
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    let finished = stop.load(Ordering::SeqCst);
                    let hits = coord.search("alice", "talk", "cats", mode, 10).expect("search");
                    seen.push(hits.into_iter().map(|h| h.document.text).collect::<BTreeSet<_>>());
                    if finished {
                        return seen;
                    }
                }
            })
        })
        .collect();

    let builder = {
        let coord = Arc::clone(&coord);
        thread::spawn(move || coord.build("alice", "talk", &docs("alice", "talk", &NEW)))
    };
    entered.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    release.send(()).unwrap();
    builder.join().unwrap().expect("rebuild");
    stop.store(true, Ordering::SeqCst);

    for reader in readers {
        let seen = reader.join().unwrap();
        assert!(seen.iter().all(|set| *set == old || *set == new), "mixed generations: {seen:?}");
        assert_eq!(seen.last(), Some(&new), "last search after the swap sees the new set");
    }
}

struct NoSession;

impl TenantContext for NoSession {
    fn current_tenant(&self) -> Option<String> {
        None
    }
}

#[test]
fn scoped_handle_pins_the_session_tenant() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    assert!(matches!(coord.scoped(&NoSession), Err(Error::NotAuthenticated)));

    let alice = coord.scoped(&StaticTenant("alice".into())).unwrap();
    let key = alice.key("talk").unwrap();
    let documents: Vec<Document> = SCENARIO.iter().map(|t| Document::new(&key, *t, 0.0, 1.0)).collect();
    alice.build("talk", &documents).unwrap();
    assert!(alice.exists("talk"));
    assert_eq!(alice.search("talk", "reactors", SearchMode::Lexical, 3).unwrap()[0].position, 2);
    assert_eq!(alice.list().unwrap().len(), 1);

    let bob = coord.scoped(&StaticTenant("bob".into())).unwrap();
    assert!(!bob.exists("talk"));
    assert!(matches!(bob.build("talk", &documents), Err(Error::InvalidDocument(_))));
    assert_eq!(alice.delete("talk").unwrap().len(), 3);
}

#[test]
fn list_reports_each_collection() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    coord.build("alice", "one", &docs("alice", "one", &["a b c"])).unwrap();
    coord.build("alice", "two", &docs("alice", "two", &["d e", "f g"])).unwrap();

    let listings = coord.list("alice").unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].collection_id, "one");
    assert_eq!(listings[0].document_count, Some(1));
    assert_eq!(listings[1].document_count, Some(2));
    assert!(listings.iter().all(|l| l.state == IndexState::Ready));

    coord.delete("alice", "one").unwrap();
    let listings = coord.list("alice").unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].collection_id, "two");
    assert!(coord.list("nobody").unwrap().is_empty());
}

#[test]
fn evicted_generation_reloads_on_demand() {
    let tmp = TempDir::new().unwrap();
    let coord = coordinator(tmp.path());
    let built = coord.build("alice", "talk", &docs("alice", "talk", &SCENARIO)).unwrap();
    assert!(coord.evict("alice", "talk").unwrap());
    assert!(!coord.evict("alice", "talk").unwrap());
    assert!(!coord.evict("alice", "never-built").unwrap());

    let hits = coord.search("alice", "talk", "reactors", SearchMode::Lexical, 1).unwrap();
    assert_eq!(hits[0].position, 2);
    assert_eq!(coord.stats("alice", "talk").unwrap().generation, built.generation);
}
