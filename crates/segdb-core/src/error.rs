use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Index not ready for tenant '{tenant_id}', collection '{collection_id}'")]
    NotReady { tenant_id: String, collection_id: String },

    #[error("Build already in progress for tenant '{tenant_id}', collection '{collection_id}'")]
    BuildInProgress { tenant_id: String, collection_id: String },

    #[error("{0} index is not loaded")]
    NotLoaded(&'static str),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Unsupported fusion method: {0}")]
    UnsupportedFusionMethod(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No tenant in the current context")]
    NotAuthenticated,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// State-machine violations and provider hiccups; the caller may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::BuildInProgress { .. } | Self::NotLoaded(_) | Self::Embedding(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
