use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use anyhow::Context as _;
use async_trait::async_trait;
use doc_store::{
    Collection, Document, EmbeddingStatus, PendingEmbedding, Store, StoreConfig, StoreStats,
};
use embedding::{Embedder, EmbedderConfig, EmbeddingRuntime, OllamaRuntime, RerankRuntime};
use index_watch::{start_watch, WatchConfig, WatchHandle, WatchRoot, WatchSink, WatchStatus};
use indexing::{
    hybrid_search, lexical_search, reindex_all, vector_only_search, HybridContext, IndexOutcome,
    IndexSummary, QueryOptions, RerankCallback, SearchResult,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{config::EngineConfig, error::MemoirError};

/// Options for the BM25-first and ANN-only entry points.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: Option<String>,
    pub limit: usize,
    pub min_score: f64,
    /// Opt into the fused pipeline from the lexical entry point.
    pub use_hybrid: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            collection: None,
            limit: 10,
            min_score: 0.0,
            use_hybrid: false,
        }
    }
}

/// Options for the fused `query` entry point.
#[derive(Clone, Default)]
pub struct QueryRequest {
    pub collection: Option<String>,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    /// Forces hybrid on or off; unset means "hybrid when an embedding is
    /// obtainable".
    pub use_hybrid: Option<bool>,
    /// External rerank callback, blended with the fused score.
    pub rerank: Option<RerankCallback>,
    /// `(bm25, vector)` fusion weights.
    pub weights: Option<(f64, f64)>,
}

/// Single public composition point for store, indexer, searcher, embedder,
/// and watcher.
pub struct Engine {
    config: EngineConfig,
    store: OnceLock<Arc<Store>>,
    embedder: Arc<Embedder>,
    dimension: AtomicUsize,
    watch: AsyncMutex<Option<WatchHandle>>,
}

impl Engine {
    /// Build an engine over the default Ollama-backed embedding runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_runtimes(config, Arc::new(OllamaRuntime::default()), None)
    }

    /// Build an engine with explicit runtimes, the seam tests and embedders
    /// other than Ollama plug into.
    pub fn with_runtimes(
        config: EngineConfig,
        runtime: Arc<dyn EmbeddingRuntime>,
        rerank_runtime: Option<Arc<dyn RerankRuntime>>,
    ) -> Self {
        let embedder = Embedder::new(
            EmbedderConfig {
                embedding_model: config.embedding_model.clone(),
                rerank_model: config.rerank_model.clone(),
                load_timeout: config.model_load_timeout,
            },
            runtime,
            rerank_runtime,
        );

        Self {
            dimension: AtomicUsize::new(config.dimension),
            config,
            store: OnceLock::new(),
            embedder: Arc::new(embedder),
            watch: AsyncMutex::new(None),
        }
    }

    /// Open the store. Idempotent: a second call is a no-op.
    pub async fn initialize(&self) -> Result<(), MemoirError> {
        if self.store.get().is_some() {
            return Ok(());
        }

        let config = StoreConfig {
            data_dir: self.config.data_dir.clone(),
            dimension: self.dimension.load(Ordering::SeqCst),
        };
        let store = tokio::task::spawn_blocking(move || Store::open(config))
            .await
            .context("store open task failed")
            .map_err(MemoirError::Internal)??;

        let _ = self.store.set(Arc::new(store));
        info!(data_dir = %self.config.data_dir.display(), "engine initialized");
        Ok(())
    }

    pub(crate) fn store(&self) -> Result<Arc<Store>, MemoirError> {
        self.store.get().cloned().ok_or(MemoirError::NotInitialized)
    }

    // ---- collections -----------------------------------------------------

    pub async fn add_collection(
        &self,
        name: &str,
        path: &Path,
        glob: Option<&str>,
    ) -> Result<Collection, MemoirError> {
        let store = self.store()?;
        let name = name.to_string();
        let path = path.to_path_buf();
        let glob = glob.map(|glob| glob.to_string());

        tokio::task::spawn_blocking(move || store.add_collection(&name, &path, glob.as_deref()))
            .await
            .context("collection task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::from)
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>, MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || store.list_collections())
            .await
            .context("collection task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn get_collection(&self, name: &str) -> Result<Option<Collection>, MemoirError> {
        let store = self.store()?;
        let name = name.to_string();
        tokio::task::spawn_blocking(move || store.get_collection(&name))
            .await
            .context("collection task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn remove_collection(&self, name: &str) -> Result<bool, MemoirError> {
        let store = self.store()?;
        let name = name.to_string();
        tokio::task::spawn_blocking(move || store.remove_collection(&name))
            .await
            .context("collection task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    // ---- indexing --------------------------------------------------------

    pub async fn reindex(&self, incremental: bool) -> Result<IndexSummary, MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || reindex_all(&store, incremental))
            .await
            .context("reindex task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    /// Index one file inside a named collection; used by the memory facade
    /// after a write and by the watcher sink.
    pub(crate) async fn index_path(
        &self,
        collection: &str,
        rel_path: &str,
    ) -> Result<IndexOutcome, MemoirError> {
        let store = self.store()?;
        let collection = collection.to_string();
        let rel_path = rel_path.to_string();

        tokio::task::spawn_blocking(move || {
            let Some(collection) = store.get_collection(&collection)? else {
                anyhow::bail!("unknown collection: {collection}");
            };
            indexing::index_file(&store, &collection, &rel_path)
        })
        .await
        .context("index task failed")
        .map_err(MemoirError::Internal)?
        .map_err(MemoirError::Internal)
    }

    // ---- search ----------------------------------------------------------

    fn query_options(&self, collection: Option<String>, limit: usize, min_score: f64) -> QueryOptions {
        QueryOptions {
            collection,
            limit,
            min_score,
            preview_bytes: self.config.preview_bytes,
        }
    }

    /// BM25 search; `use_hybrid` routes through the fused pipeline instead.
    pub async fn search(
        &self,
        query: &str,
        request: SearchRequest,
    ) -> Result<Vec<SearchResult>, MemoirError> {
        if request.use_hybrid {
            return self
                .query(
                    query,
                    None,
                    QueryRequest {
                        collection: request.collection,
                        limit: Some(request.limit),
                        min_score: Some(request.min_score),
                        use_hybrid: Some(true),
                        ..QueryRequest::default()
                    },
                )
                .await;
        }

        let store = self.store()?;
        let opts = self.query_options(request.collection, request.limit, request.min_score);
        lexical_search(&store, query, &opts)
            .await
            .map_err(MemoirError::Internal)
    }

    /// ANN-only search over a caller-supplied embedding.
    pub async fn vsearch(
        &self,
        embedding: Vec<f32>,
        request: SearchRequest,
    ) -> Result<Vec<SearchResult>, MemoirError> {
        let store = self.store()?;
        let opts = self.query_options(request.collection, request.limit, request.min_score);
        vector_only_search(&store, embedding, &opts)
            .await
            .map_err(MemoirError::Internal)
    }

    /// Fused query. Hybrid ranking engages when a query embedding is
    /// supplied or an embedding model is already loaded; `use_hybrid`
    /// overrides in either direction.
    pub async fn query(
        &self,
        text: &str,
        embedding: Option<Vec<f32>>,
        request: QueryRequest,
    ) -> Result<Vec<SearchResult>, MemoirError> {
        let store = self.store()?;
        let limit = request.limit.unwrap_or(10);
        let min_score = request.min_score.unwrap_or(0.0);
        let opts = self.query_options(request.collection.clone(), limit, min_score);

        let query_embedding = match (embedding, request.use_hybrid) {
            (_, Some(false)) => None,
            (Some(embedding), _) => Some(embedding),
            (None, Some(true)) => match self.embedder.embed_query(text).await {
                Ok(embedding) => Some(embedding),
                Err(error) => {
                    warn!(%error, "query embedding failed, degrading to lexical search");
                    None
                }
            },
            (None, None) => {
                if self.embedder.is_loaded().await {
                    match self.embedder.embed_query(text).await {
                        Ok(embedding) => Some(embedding),
                        Err(error) => {
                            warn!(%error, "query embedding failed, degrading to lexical search");
                            None
                        }
                    }
                } else {
                    None
                }
            }
        };

        let Some(query_embedding) = query_embedding else {
            return lexical_search(&store, text, &opts)
                .await
                .map_err(MemoirError::Internal);
        };

        let (weight_bm25, weight_vec) = request
            .weights
            .unwrap_or((self.config.weight_bm25, self.config.weight_vec));
        let ctx = HybridContext {
            query_embedding: Some(query_embedding),
            reranker: self.embedder.loaded_rerank_model().await,
            rerank_callback: request.rerank,
            rrf_k: Some(self.config.rrf_k),
            weight_bm25: Some(weight_bm25),
            weight_vec: Some(weight_vec),
        };

        hybrid_search(&store, text, &ctx, &opts)
            .await
            .map_err(MemoirError::Internal)
    }

    /// Resolve `collection/relative/path.md` or a bare relative path.
    pub async fn get(&self, identifier: &str) -> Result<Option<Document>, MemoirError> {
        let store = self.store()?;
        let identifier = identifier.to_string();
        tokio::task::spawn_blocking(move || store.resolve_document(&identifier))
            .await
            .context("document task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn stats(&self) -> Result<StoreStats, MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || store.stats())
            .await
            .context("stats task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    // ---- embeddings ------------------------------------------------------

    pub async fn get_hashes_for_embedding(&self) -> Result<Vec<PendingEmbedding>, MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || store.hashes_for_embedding())
            .await
            .context("embedding task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn insert_embedding(
        &self,
        content_hash: &str,
        seq: i64,
        pos: i64,
        embedding: Vec<f32>,
    ) -> Result<(), MemoirError> {
        let store = self.store()?;
        let content_hash = content_hash.to_string();
        let model_name = self.embedder.model_name();

        tokio::task::spawn_blocking(move || {
            store.insert_embedding(&content_hash, seq, pos, &model_name, &embedding)
        })
        .await
        .context("embedding task failed")
        .map_err(MemoirError::Internal)?
        .map_err(MemoirError::Internal)
    }

    pub async fn clear_all_embeddings(&self) -> Result<(), MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || store.clear_all_embeddings())
            .await
            .context("embedding task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn embedding_status(&self) -> Result<EmbeddingStatus, MemoirError> {
        let store = self.store()?;
        tokio::task::spawn_blocking(move || store.embedding_status())
            .await
            .context("embedding task failed")
            .map_err(MemoirError::Internal)?
            .map_err(MemoirError::Internal)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemoirError> {
        Ok(self.embedder.embed_query(text).await?)
    }

    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>, MemoirError> {
        Ok(self.embedder.embed_document(text).await?)
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>, MemoirError> {
        Ok(self.embedder.embed_batch(texts).await?)
    }

    /// Embed every content hash that is missing its whole-document vector.
    /// Per-item failures are logged and skipped. Returns the number of
    /// vectors written.
    pub async fn embed_all(&self) -> Result<usize, MemoirError> {
        let pending = self.get_hashes_for_embedding().await?;
        let store = self.store()?;
        let model_name = self.embedder.model_name();
        let mut written = 0;

        for item in pending {
            let body = {
                let store = Arc::clone(&store);
                let hash = item.content_hash.clone();
                tokio::task::spawn_blocking(move || store.content_for_hash(&hash))
                    .await
                    .context("content task failed")
                    .map_err(MemoirError::Internal)?
                    .map_err(MemoirError::Internal)?
            };
            let Some((_, body)) = body else {
                continue;
            };

            let vector = match self.embedder.embed_document(&body).await {
                Ok(vector) => vector,
                Err(error) => {
                    warn!(probe = %item.probe_path, %error, "failed to embed document");
                    continue;
                }
            };

            let insert = {
                let store = Arc::clone(&store);
                let hash = item.content_hash.clone();
                let model_name = model_name.clone();
                tokio::task::spawn_blocking(move || {
                    store.insert_embedding(&hash, 0, 0, &model_name, &vector)
                })
                .await
                .context("embedding task failed")
                .map_err(MemoirError::Internal)?
            };
            match insert {
                Ok(()) => written += 1,
                Err(error) => warn!(probe = %item.probe_path, %error, "failed to store embedding"),
            }
        }

        Ok(written)
    }

    // ---- model lifecycle -------------------------------------------------

    pub async fn set_embedding_model(
        &self,
        reference: &str,
        dimension: usize,
    ) -> Result<(), MemoirError> {
        self.embedder.set_model(reference).await;
        self.dimension.store(dimension, Ordering::SeqCst);

        if let Ok(store) = self.store() {
            tokio::task::spawn_blocking(move || store.set_dimension(dimension))
                .await
                .context("dimension task failed")
                .map_err(MemoirError::Internal)?
                .map_err(MemoirError::Internal)?;
        }

        Ok(())
    }

    pub fn get_embedding_model(&self) -> String {
        self.embedder.model_name()
    }

    pub fn get_embedding_dimension(&self) -> usize {
        self.dimension.load(Ordering::SeqCst)
    }

    pub async fn preload_embedding_model(&self) -> Result<(), MemoirError> {
        Ok(self.embedder.preload().await?)
    }

    pub async fn preload_rerank_model(&self) -> Result<(), MemoirError> {
        Ok(self.embedder.preload_rerank().await?)
    }

    pub async fn is_embedding_model_loaded(&self) -> bool {
        self.embedder.is_loaded().await
    }

    pub async fn is_rerank_model_loaded(&self) -> bool {
        self.embedder.is_rerank_loaded().await
    }

    // ---- auto-embed watcher ----------------------------------------------

    /// Start the file watcher + periodic embed pass. At most one watcher per
    /// engine; a second start is a warning no-op.
    pub async fn start_auto_embed(
        self: &Arc<Self>,
        watch_config: Option<WatchConfig>,
    ) -> Result<(), MemoirError> {
        let mut slot = self.watch.lock().await;
        if slot.is_some() {
            warn!("auto-embed watcher already running");
            return Ok(());
        }

        let roots: Vec<WatchRoot> = self
            .list_collections()
            .await?
            .into_iter()
            .map(|collection| WatchRoot {
                collection: collection.name,
                path: PathBuf::from(collection.root),
            })
            .collect();

        let sink = Arc::new(EngineSink {
            engine: Arc::clone(self),
        });
        let handle = start_watch(
            roots,
            watch_config.unwrap_or_else(|| self.config.watch.clone()),
            sink,
        )
        .await?;

        *slot = Some(handle);
        info!("auto-embed watcher started");
        Ok(())
    }

    /// Idempotent: stopping a stopped watcher is a no-op.
    pub async fn stop_auto_embed(&self) {
        let handle = self.watch.lock().await.take();
        if let Some(mut handle) = handle {
            handle.stop().await;
            info!("auto-embed watcher stopped");
        }
    }

    pub async fn watch_status(&self) -> Option<WatchStatus> {
        self.watch.lock().await.as_ref().map(WatchHandle::status)
    }

    // ---- shutdown --------------------------------------------------------

    /// Stop the watcher, unload models, close the database — in that order,
    /// every step attempted even when an earlier one fails.
    pub async fn close(&self) -> Result<(), MemoirError> {
        self.stop_auto_embed().await;
        self.embedder.unload().await;

        if let Ok(store) = self.store() {
            let result = tokio::task::spawn_blocking(move || store.close())
                .await
                .context("close task failed")
                .map_err(MemoirError::Internal)?;
            if let Err(error) = result {
                warn!(%error, "store close reported an error");
            }
        }

        debug!("engine closed");
        Ok(())
    }
}

/// Watcher callbacks routed back into the engine. Every branch logs and
/// continues; nothing may escape the watcher task boundary.
struct EngineSink {
    engine: Arc<Engine>,
}

#[async_trait]
impl WatchSink for EngineSink {
    async fn path_changed(&self, collection: &str, rel_path: &str) {
        if let Err(error) = self.engine.index_path(collection, rel_path).await {
            warn!(collection, rel_path, %error, "failed to index changed path");
        }
    }

    async fn path_removed(&self, collection: &str, rel_path: &str) {
        if let Err(error) = self.engine.index_path(collection, rel_path).await {
            warn!(collection, rel_path, %error, "failed to reconcile removed path");
        }
    }

    async fn rescan(&self) {
        if let Err(error) = self.engine.reindex(true).await {
            warn!(%error, "watcher rescan failed");
        }
    }

    async fn embed_pass(&self) {
        match self.engine.embed_all().await {
            Ok(0) => {}
            Ok(written) => debug!(written, "auto-embed pass wrote vectors"),
            Err(error) => warn!(%error, "auto-embed pass failed"),
        }
    }
}
