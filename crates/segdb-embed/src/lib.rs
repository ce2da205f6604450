use std::sync::Arc;

use tracing::info;

use segdb_core::config::{EmbeddingProvider, EmbeddingSettings};
use segdb_core::traits::Embedder;
use segdb_core::Result;

pub mod cache;
pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use cache::CachedEmbedder;
pub use hash::HashEmbedder;
pub use model::BgeM3Embedder;
pub use pool::masked_mean_l2;

/// Builds the configured provider, wrapped in a cache when `cache_capacity > 0`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash provider regardless of config.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let base: Arc<dyn Embedder> = if use_fake || settings.provider == EmbeddingProvider::Hash {
        info!(dim = settings.dim, "using hash embedder");
        Arc::new(HashEmbedder::new(settings.dim, settings.max_len))
    } else {
        Arc::new(BgeM3Embedder::new(settings)?)
    };

    if settings.cache_capacity == 0 {
        return Ok(base);
    }
    Ok(Arc::new(CachedEmbedder::new(base, settings.cache_capacity)))
}
