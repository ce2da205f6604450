//! segdb-core
//!
//! Data model, error taxonomy, collaborator traits, artifact storage helpers and
//! configuration shared by the segdb engines.
pub mod config;
pub mod error;
pub mod paths;
pub mod storage;
pub mod traits;
pub mod transcript;
pub mod types;

pub use error::{Error, Result};
pub use types::{ArtifactKind, Document, FusionMethod, SearchHit, SearchMode, SourceKind, TenantKey};
