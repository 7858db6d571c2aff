//! Tree-structured memory over the hybrid document search engine.
//!
//! [`Engine`] is the single composition point for the store, indexer,
//! searcher, embedder, and watcher. [`Memoir`] layers the dotted-key memory
//! facade on top: hierarchical keys mapped onto Markdown files, zone
//! policies, per-key write serialization, and half-life decay at search
//! time.

mod config;
mod decay;
mod engine;
mod error;
mod keyed_lock;
mod keys;
mod memoir;
mod tree;
mod zones;

#[cfg(test)]
mod tests;

pub use config::{EngineConfig, MemoirConfig};
pub use engine::{Engine, QueryRequest, SearchRequest};
pub use error::MemoirError;
pub use keys::{key_to_rel_path, rel_path_to_key};
pub use memoir::{Memoir, MemoryNote, MemorySearchHit, MemorySummary, SetOutcome};
pub use tree::{TreeNode, TreeNodeKind};
pub use zones::{Zone, ZoneStats};

pub use doc_store::{Collection, Document, EmbeddingStatus, PendingEmbedding, StoreStats};
pub use indexing::{IndexSummary, SearchResult, SearchSource};
