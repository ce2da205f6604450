//! Domain types shared by the vector, lexical and hybrid engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One transcript segment as indexed by both engines.
///
/// - `text`: the segment payload
/// - `start`/`end`: offsets in seconds within the source media
/// - `collection_id`/`tenant_id`: the owning key; must match the key it is built under
///
/// Identity is positional: the index of the segment within the build that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub collection_id: String,
    pub tenant_id: String,
}

impl Document {
    pub fn new(key: &TenantKey, text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            collection_id: key.collection_id().to_string(),
            tenant_id: key.tenant_id().to_string(),
        }
    }
}

/// The unit of isolation and of index lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey {
    tenant_id: String,
    collection_id: String,
}

impl TenantKey {
    pub fn new(tenant_id: impl Into<String>, collection_id: impl Into<String>) -> Result<Self> {
        let tenant_id = tenant_id.into();
        let collection_id = collection_id.into();
        if tenant_id.is_empty() {
            return Err(Error::InvalidKey("tenant_id must not be empty".into()));
        }
        if collection_id.is_empty() {
            return Err(Error::InvalidKey("collection_id must not be empty".into()));
        }
        Ok(Self { tenant_id, collection_id })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn owns(&self, doc: &Document) -> bool {
        doc.tenant_id == self.tenant_id && doc.collection_id == self.collection_id
    }

    pub fn not_ready(&self) -> Error {
        Error::NotReady { tenant_id: self.tenant_id.clone(), collection_id: self.collection_id.clone() }
    }

    pub fn build_in_progress(&self) -> Error {
        Error::BuildInProgress { tenant_id: self.tenant_id.clone(), collection_id: self.collection_id.clone() }
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.collection_id)
    }
}

/// The three persisted artifacts of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Vector,
    Lexical,
    Fusion,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Vector, ArtifactKind::Lexical, ArtifactKind::Fusion];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Vector => "vector",
            ArtifactKind::Lexical => "lexical",
            ArtifactKind::Fusion => "fusion",
        }
    }

    /// Canonical file name used by path resolvers that lay artifacts out per key directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Vector => "vector_index.json",
            ArtifactKind::Lexical => "lexical_index.json",
            ArtifactKind::Fusion => "fusion_meta.json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Lexical,
    Hybrid,
}

/// The surface returned by all engines.
///
/// `position` cross-references the same document in both engines of a generation.
/// `score` is engine-specific but higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub position: usize,
    pub document: Document,
    pub score: f32,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Lexical,
    #[default]
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(SearchMode::Vector),
            "lexical" | "bm25" => Ok(SearchMode::Lexical),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(Error::Configuration(format!("unknown search mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    WeightedAverage,
    #[default]
    #[serde(alias = "reciprocal_rank_fusion")]
    Rrf,
    Condorcet,
}

impl FusionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            FusionMethod::WeightedAverage => "weighted_average",
            FusionMethod::Rrf => "rrf",
            FusionMethod::Condorcet => "condorcet",
        }
    }
}

impl FromStr for FusionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_average" => Ok(FusionMethod::WeightedAverage),
            "rrf" | "reciprocal_rank_fusion" => Ok(FusionMethod::Rrf),
            "condorcet" => Ok(FusionMethod::Condorcet),
            _ => Err(Error::UnsupportedFusionMethod(s.to_string())),
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BM25 parameters. `epsilon` floors the IDF so very common terms never score negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, epsilon: 0.25 }
    }
}

/// Declared language of a collection, used to pick a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Zh,
    #[default]
    Auto,
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "zh" | "chinese" => Ok(Language::Zh),
            "auto" => Ok(Language::Auto),
            other => Err(Error::Configuration(format!("unknown language '{other}'"))),
        }
    }
}

/// Persisted per-generation fusion settings; also the commit marker of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionMetadata {
    pub vector_weight: f32,
    pub lexical_weight: f32,
    pub fusion_method: FusionMethod,
    pub document_count: usize,
    pub tenant_id: String,
    pub collection_id: String,
    pub generation: u64,
    pub rrf_k: f32,
    pub embedder_id: String,
    pub built_at_ms: i64,
}
