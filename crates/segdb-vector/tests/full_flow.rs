use std::sync::Arc;

use segdb_core::storage::ArtifactHeader;
use segdb_core::traits::{Embedder, RetrievalEngine};
use segdb_core::types::{ArtifactKind, Document, SourceKind};
use segdb_core::{Error, Result, TenantKey};
use segdb_embed::HashEmbedder;
use segdb_vector::VectorIndex;
use tempfile::TempDir;

fn key() -> TenantKey {
    TenantKey::new("alice", "lecture").unwrap()
}

fn docs(texts: &[&str]) -> Vec<Document> {
    let key = key();
    texts.iter().enumerate().map(|(i, t)| Document::new(&key, *t, i as f64, i as f64 + 1.0)).collect()
}

fn hash_index() -> VectorIndex {
    VectorIndex::new(Arc::new(HashEmbedder::new(128, 64)))
}

#[test]
fn vector_full_flow() {
    let mut index = hash_index();
    assert!(matches!(index.search("anything", 3), Err(Error::NotLoaded(_))));

    index.add(&docs(&["cats are mammals", "dogs bark", "fusion reactors"])).expect("add");
    let hits = index.search("cats", 3).expect("search");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].position, 0);
    assert_eq!(hits[0].source, SourceKind::Vector);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(index.search("cats", 0).unwrap().is_empty());

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vector_index.json");
    let header = ArtifactHeader::new(ArtifactKind::Vector, &key(), index.len(), 9);
    index.save(&path, &header).expect("save");
    assert!(index.exists(&path));

    let mut reloaded = hash_index();
    assert_eq!(reloaded.load(&path).expect("load"), header);
    let again = reloaded.search("cats", 3).unwrap();
    assert_eq!(
        hits.iter().map(|h| h.position).collect::<Vec<_>>(),
        again.iter().map(|h| h.position).collect::<Vec<_>>()
    );
    assert_eq!(reloaded.stats().count, 3);

    assert!(index.delete(&path).unwrap());
    assert!(!index.delete(&path).unwrap());
}

#[test]
fn equal_scores_keep_insertion_order() {
    let mut index = hash_index();
    index.add(&docs(&["same words", "same words", "same words"])).unwrap();
    let hits = index.search("same words", 3).unwrap();
    assert_eq!(hits.iter().map(|h| h.position).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn clear_unloads() {
    let mut index = hash_index();
    index.add(&docs(&["a b"])).unwrap();
    index.clear();
    assert!(index.is_empty());
    assert!(matches!(index.search("a", 1), Err(Error::NotLoaded(_))));
}

#[test]
fn load_rejects_dimension_mismatch() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vector_index.json");
    let mut index = hash_index();
    index.add(&docs(&["hello"])).unwrap();
    index.save(&path, &ArtifactHeader::new(ArtifactKind::Vector, &key(), 1, 1)).unwrap();

    let mut other = VectorIndex::new(Arc::new(HashEmbedder::new(64, 64)));
    assert!(matches!(other.load(&path), Err(Error::Configuration(_))));
    assert!(!other.is_loaded());
}

struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn id(&self) -> &str {
        "short"
    }
    fn dim(&self) -> usize {
        4
    }
    fn max_len(&self) -> usize {
        8
    }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0; 4]).collect())
    }
}

#[test]
fn wrong_vector_count_appends_nothing() {
    let mut index = VectorIndex::new(Arc::new(ShortEmbedder));
    assert!(matches!(index.add(&docs(&["one", "two"])), Err(Error::Embedding(_))));
    assert!(index.is_empty());
}
