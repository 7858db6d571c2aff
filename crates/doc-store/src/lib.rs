//! Embedded document store: SQLite schema, FTS synchronization, vector table
//! lifecycle, content-addressed dedup and orphan cleanup, plus the named
//! collections registry.

mod collections;
mod fts;
mod schema;
mod store;
mod types;

pub use collections::CollectionError;
pub use fts::{build_match_query, fts_text, normalize_bm25};
pub use store::{Store, StoreConfig, UpsertInput, UpsertOutcome};
pub use types::{
    Collection, CollectionStats, Document, EmbeddingStatus, LexicalHit, PendingEmbedding,
    StoreStats, VectorHit,
};
