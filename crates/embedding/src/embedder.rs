use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    format::{format_document, format_query},
    model::{EmbedError, EmbeddingModel, EmbeddingRuntime, ModelSpec, RerankModel, RerankRuntime},
    single_flight::SingleFlight,
};

const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Raw model reference: a runtime name or an `hf:owner/repo/file` URI.
    pub embedding_model: String,
    /// Optional cross-encoder reference for reranking.
    pub rerank_model: Option<String>,
    pub load_timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            embedding_model: "nomic-embed-text".to_string(),
            rerank_model: None,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

/// Lazy, single-flight owner of the embedding and rerank contexts. Batch
/// embedding is sequential: the underlying contexts are one-at-a-time.
pub struct Embedder {
    runtime: Arc<dyn EmbeddingRuntime>,
    rerank_runtime: Option<Arc<dyn RerankRuntime>>,
    spec: Mutex<ModelSpec>,
    rerank_spec: Mutex<Option<ModelSpec>>,
    load_timeout: Duration,
    model_flight: SingleFlight<Arc<dyn EmbeddingModel>>,
    rerank_flight: SingleFlight<Arc<dyn RerankModel>>,
}

impl Embedder {
    pub fn new(
        config: EmbedderConfig,
        runtime: Arc<dyn EmbeddingRuntime>,
        rerank_runtime: Option<Arc<dyn RerankRuntime>>,
    ) -> Self {
        Self {
            runtime,
            rerank_runtime,
            spec: Mutex::new(ModelSpec::parse(&config.embedding_model)),
            rerank_spec: Mutex::new(config.rerank_model.as_deref().map(ModelSpec::parse)),
            load_timeout: config.load_timeout,
            model_flight: SingleFlight::new(),
            rerank_flight: SingleFlight::new(),
        }
    }

    pub fn model_name(&self) -> String {
        self.spec().display_name()
    }

    fn spec(&self) -> ModelSpec {
        self.spec.lock().expect("model spec lock poisoned").clone()
    }

    /// Switch to a different embedding model. The old context is discarded;
    /// the next call loads lazily.
    pub async fn set_model(&self, reference: &str) {
        {
            let mut spec = self.spec.lock().expect("model spec lock poisoned");
            *spec = ModelSpec::parse(reference);
        }
        self.model_flight.unload().await;
    }

    async fn model(&self) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
        let runtime = Arc::clone(&self.runtime);
        let spec = self.spec();
        let timeout = self.load_timeout;

        self.model_flight
            .get_or_load(async move {
                debug!(model = %spec.display_name(), "loading embedding model");
                match tokio::time::timeout(timeout, runtime.load(&spec)).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbedError::LoadTimeout(timeout)),
                }
            })
            .await
    }

    async fn rerank_model(&self) -> Result<Arc<dyn RerankModel>, EmbedError> {
        let Some(runtime) = self.rerank_runtime.as_ref().map(Arc::clone) else {
            return Err(EmbedError::ModelUnavailable(
                "no rerank runtime configured".to_string(),
            ));
        };
        let spec = {
            let spec = self.rerank_spec.lock().expect("rerank spec lock poisoned");
            spec.clone().ok_or_else(|| {
                EmbedError::ModelUnavailable("no rerank model configured".to_string())
            })?
        };
        let timeout = self.load_timeout;

        self.rerank_flight
            .get_or_load(async move {
                debug!(model = %spec.display_name(), "loading rerank model");
                match tokio::time::timeout(timeout, runtime.load(&spec)).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbedError::LoadTimeout(timeout)),
                }
            })
            .await
    }

    pub async fn preload(&self) -> Result<(), EmbedError> {
        self.model().await.map(|_| ())
    }

    pub async fn preload_rerank(&self) -> Result<(), EmbedError> {
        self.rerank_model().await.map(|_| ())
    }

    pub async fn is_loaded(&self) -> bool {
        self.model_flight.is_loaded().await
    }

    pub async fn is_rerank_loaded(&self) -> bool {
        self.rerank_flight.is_loaded().await
    }

    /// The loaded cross-encoder, if any, without triggering a load.
    pub async fn loaded_rerank_model(&self) -> Option<Arc<dyn RerankModel>> {
        self.rerank_flight.loaded().await
    }

    /// Drop both contexts. The runtime handles stay alive so a later load
    /// does not pay startup costs twice.
    pub async fn unload(&self) {
        self.model_flight.unload().await;
        self.rerank_flight.unload().await;
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = self.model().await?;
        model.embed(&format_query(text)).await
    }

    pub async fn embed_document(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = self.model().await?;
        model.embed(&format_document(text)).await
    }

    /// Embed many documents sequentially. A per-item failure yields `None`
    /// in its slot and the batch continues.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, EmbedError> {
        let model = self.model().await?;

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match model.embed(&format_document(text)).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(error) => {
                    warn!(%error, "batch embedding item failed");
                    vectors.push(None);
                }
            }
        }

        Ok(vectors)
    }

    /// Score candidate documents with the loaded cross-encoder.
    pub async fn rank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EmbedError> {
        let model = self.rerank_model().await?;
        model.rank(query, documents).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::{Embedder, EmbedderConfig};
    use crate::model::{EmbedError, EmbeddingModel, EmbeddingRuntime, ModelSpec};

    pub(crate) struct StubModel {
        pub(crate) name: String,
        pub(crate) dimension: usize,
    }

    #[async_trait]
    impl EmbeddingModel for StubModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("poison") {
                return Err(EmbedError::Backend("poisoned input".to_string()));
            }
            // Deterministic pseudo-embedding derived from byte content.
            let mut vector = vec![0.0f32; self.dimension];
            for (index, byte) in text.bytes().enumerate() {
                vector[index % self.dimension] += byte as f32 / 255.0;
            }
            Ok(vector)
        }
    }

    pub(crate) struct StubRuntime {
        pub(crate) dimension: usize,
        pub(crate) loads: AtomicUsize,
        pub(crate) delay_ms: u64,
    }

    impl StubRuntime {
        pub(crate) fn new(dimension: usize) -> Self {
            Self {
                dimension,
                loads: AtomicUsize::new(0),
                delay_ms: 0,
            }
        }
    }

    #[async_trait]
    impl EmbeddingRuntime for StubRuntime {
        async fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, EmbedError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if spec.runtime_name() == "missing-model" {
                return Err(EmbedError::ModelUnavailable(spec.display_name()));
            }
            Ok(Arc::new(StubModel {
                name: spec.runtime_name().to_string(),
                dimension: self.dimension,
            }))
        }
    }

    fn embedder_with(runtime: Arc<StubRuntime>, model: &str) -> Embedder {
        Embedder::new(
            EmbedderConfig {
                embedding_model: model.to_string(),
                ..EmbedderConfig::default()
            },
            runtime,
            None,
        )
    }

    #[tokio::test]
    async fn lazy_load_happens_once_across_calls() {
        let runtime = Arc::new(StubRuntime::new(4));
        let embedder = embedder_with(Arc::clone(&runtime), "stub-model");

        assert!(!embedder.is_loaded().await);
        embedder.embed_query("one").await.expect("embed failed");
        embedder.embed_document("two").await.expect("embed failed");
        assert!(embedder.is_loaded().await);
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_allows_retry_after_model_change() {
        let runtime = Arc::new(StubRuntime::new(4));
        let embedder = embedder_with(Arc::clone(&runtime), "missing-model");

        assert!(matches!(
            embedder.embed_query("q").await,
            Err(EmbedError::ModelUnavailable(_))
        ));
        assert!(!embedder.is_loaded().await);

        embedder.set_model("stub-model").await;
        embedder.embed_query("q").await.expect("embed failed");
        assert!(embedder.is_loaded().await);
    }

    #[tokio::test]
    async fn batch_embeds_sequentially_with_per_item_failures() {
        let runtime = Arc::new(StubRuntime::new(4));
        let embedder = embedder_with(runtime, "stub-model");

        let texts = vec![
            "alpha".to_string(),
            "poison pill".to_string(),
            "gamma".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.expect("batch failed");

        assert_eq!(vectors.len(), 3);
        assert!(vectors[0].is_some());
        assert!(vectors[1].is_none());
        assert!(vectors[2].is_some());
    }

    #[tokio::test]
    async fn rank_without_runtime_reports_model_unavailable() {
        let runtime = Arc::new(StubRuntime::new(4));
        let embedder = embedder_with(runtime, "stub-model");

        assert!(matches!(
            embedder.rank("q", &["doc".to_string()]).await,
            Err(EmbedError::ModelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unload_keeps_runtime_and_reloads_on_demand() {
        let runtime = Arc::new(StubRuntime::new(4));
        let embedder = embedder_with(Arc::clone(&runtime), "stub-model");

        embedder.preload().await.expect("preload failed");
        embedder.unload().await;
        assert!(!embedder.is_loaded().await);

        embedder.embed_query("again").await.expect("embed failed");
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 2);
    }
}
