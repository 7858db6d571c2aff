use embedding::EmbedError;
use index_watch::WatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoirError {
    #[error("invalid memory key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("memory path escapes the root: {0}")]
    PathEscape(String),
    #[error("zone '{zone}' allows at most {max_depth} segments, key '{key}' is deeper")]
    ZoneDepthExceeded {
        zone: String,
        max_depth: usize,
        key: String,
    },
    #[error("zone '{zone}' is full ({max_items} items)")]
    ZoneQuotaExceeded { zone: String, max_items: usize },
    #[error("collection root does not exist: {0}")]
    CollectionPathMissing(String),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<doc_store::CollectionError> for MemoirError {
    fn from(error: doc_store::CollectionError) -> Self {
        match error {
            doc_store::CollectionError::PathMissing(path) => Self::CollectionPathMissing(path),
            doc_store::CollectionError::Internal(inner) => Self::Internal(inner),
        }
    }
}
