//! Indexing pipeline and hybrid searcher for Markdown collections.
//!
//! The flow mirrors the store's coherence protocol:
//! 1. `reindex_collection` walks a collection root, parses front-matter, and
//!    upserts every Markdown file it finds.
//! 2. Paths that disappeared from disk are soft-deleted so a later
//!    reappearance restores them.
//! 3. `hybrid_search` fans BM25 and ANN retrieval out in parallel, fuses by
//!    reciprocal rank, and applies the first applicable rerank strategy.

mod files;
mod reindex;
mod search;

#[cfg(test)]
mod tests;

pub use files::{collect_markdown_files, MarkdownFile};
pub use reindex::{index_file, reindex_all, reindex_collection, IndexOutcome, IndexSummary};
pub use search::{
    hybrid_search, lexical_search, vector_only_search, HybridContext, QueryOptions,
    RerankCallback, SearchResult, SearchSource,
};
