//! Configuration loader, typed index settings and path helpers.
//!
//! Uses Figment to merge serialized defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (nested keys separated by `__`, e.g. `APP_INDEX__RRF_K=30`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{Bm25Params, FusionMethod, Language};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Self::defaults().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Defaults overlaid with an inline TOML document; no files or env involved.
    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        let config = Self { figment: Self::defaults().merge(Toml::string(toml)) };
        config.index_settings()?;
        Ok(config)
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::default("index", IndexSettings::default()))
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn index_settings(&self) -> anyhow::Result<IndexSettings> {
        let settings: IndexSettings = self.get("index")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        if matches!(env, "prod" | "production") {
            let settings = self.index_settings()?;
            if settings.embedding.provider == EmbeddingProvider::Hash {
                anyhow::bail!("the hash embedding provider is not allowed in production");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Root under which the default resolver lays out per-tenant directories.
    pub root_dir: String,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    pub fusion_method: FusionMethod,
    pub rrf_k: f32,
    /// Hybrid search fetches `max(top_k * candidate_multiplier, min_candidates)` per engine.
    pub candidate_multiplier: usize,
    pub min_candidates: usize,
    /// Default score floor for searches; hits scoring below it are dropped.
    pub min_score: Option<f32>,
    pub bm25: Bm25Params,
    pub language: Language,
    pub embedding: EmbeddingSettings,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            root_dir: "data".to_string(),
            vector_weight: 0.6,
            lexical_weight: 0.4,
            fusion_method: FusionMethod::Rrf,
            rrf_k: 60.0,
            candidate_multiplier: 2,
            min_candidates: 10,
            min_score: None,
            bm25: Bm25Params::default(),
            language: Language::Auto,
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl IndexSettings {
    pub fn validate(&self) -> Result<()> {
        let weights_ok = [self.vector_weight, self.lexical_weight].iter().all(|w| w.is_finite() && *w >= 0.0);
        if !weights_ok || self.vector_weight + self.lexical_weight <= 0.0 {
            return Err(Error::Configuration(format!(
                "fusion weights must be finite, non-negative and not both zero (got {}, {})",
                self.vector_weight, self.lexical_weight
            )));
        }
        if !(self.rrf_k.is_finite() && self.rrf_k > 0.0) {
            return Err(Error::Configuration(format!("rrf_k must be positive (got {})", self.rrf_k)));
        }
        if self.candidate_multiplier == 0 {
            return Err(Error::Configuration("candidate_multiplier must be at least 1".into()));
        }
        if let Some(floor) = self.min_score.filter(|f| !f.is_finite()) {
            return Err(Error::Configuration(format!("min_score must be finite (got {floor})")));
        }
        let Bm25Params { k1, b, epsilon } = self.bm25;
        if !(k1.is_finite() && k1 >= 0.0) || !(0.0..=1.0).contains(&b) || !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(Error::Configuration(format!("invalid bm25 parameters k1={k1} b={b} epsilon={epsilon}")));
        }
        if self.embedding.dim == 0 || self.embedding.max_len == 0 {
            return Err(Error::Configuration("embedding dim and max_len must be positive".into()));
        }
        Ok(())
    }

    /// `root_dir` with `~` and env vars expanded, relative paths against `base`.
    pub fn root_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.root_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    BgeM3,
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub max_len: usize,
    pub model_dir: Option<String>,
    /// Cached embeddings kept in memory; 0 disables the cache.
    pub cache_capacity: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: EmbeddingProvider::BgeM3, dim: 1024, max_len: 256, model_dir: None, cache_capacity: 4096 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
