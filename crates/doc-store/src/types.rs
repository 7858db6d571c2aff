use serde::Serialize;
use serde_json::Value as JsonValue;

/// A named collection root registered in the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub root: String,
    pub glob: String,
    pub created_at: String,
}

/// A fully materialized document row joined with its content.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub path: String,
    pub title: String,
    pub body: String,
    pub content_hash: String,
    pub frontmatter: JsonValue,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One BM25 match. `score` is normalized to (0, 1), larger is better.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub collection: String,
    pub path: String,
    pub title: String,
    pub content_hash: String,
    pub score: f64,
}

/// One ANN match after per-document dedup. `score` is `1 - cosine distance`.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub collection: String,
    pub path: String,
    pub title: String,
    pub content_hash: String,
    pub score: f64,
}

/// A content hash awaiting its `seq=0` embedding. `probe_path` is the
/// alphabetically first document path referencing the hash, for logging.
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub content_hash: String,
    pub probe_path: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EmbeddingStatus {
    pub total: usize,
    pub embedded: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub collections: Vec<CollectionStats>,
    pub documents: usize,
    pub embedding: EmbeddingStatus,
}
