use std::{path::PathBuf, time::Duration};

use index_watch::WatchConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `index.sqlite` and its WAL files.
    pub data_dir: PathBuf,
    pub embedding_model: String,
    pub rerank_model: Option<String>,
    pub dimension: usize,
    pub model_load_timeout: Duration,
    pub watch: WatchConfig,
    /// Byte budget for result content previews.
    pub preview_bytes: usize,
    pub rrf_k: f64,
    pub weight_bm25: f64,
    pub weight_vec: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("memoir-data"),
            embedding_model: "nomic-embed-text".to_string(),
            rerank_model: None,
            dimension: 768,
            model_load_timeout: Duration::from_secs(300),
            watch: WatchConfig::default(),
            preview_bytes: 500,
            rrf_k: 60.0,
            weight_bm25: 1.0,
            weight_vec: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoirConfig {
    /// Root directory the dotted keys map into.
    pub root: PathBuf,
    /// Collection name the memory tree is registered under.
    pub collection: String,
}

impl MemoirConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collection: "memory".to_string(),
        }
    }
}
